use log::{Level, LevelFilter};
use std::{fs, io, path::Path};

/// Where the installer keeps its own debug log on the live system.
const DEBUG_LOG: &str = "/var/log/installer/debug";

/// Initialize logging with the fern logger
pub fn log<F: Fn(Level, &str) + Send + Sync + 'static>(callback: F) -> Result<(), fern::InitError> {
    fern::Dispatch::new()
        .level(LevelFilter::Debug)
        // Forwarded to the front end, which may display the logs to the user.
        .chain(fern::Output::call(move |record| {
            callback(record.level(), &format!("{}", record.args()))
        }))
        .chain({
            let mut logger = fern::Dispatch::new()
                .format(|out, message, record| {
                    out.finish(format_args!(
                        "[{} ubiquity{}] {}",
                        record.level(),
                        match (record.file(), record.line()) {
                            (Some(file), Some(line)) => format!(":{}:{}", file, line),
                            _ => "".into(),
                        },
                        message
                    ))
                })
                .chain(io::stderr());

            if let Some(parent) = Path::new(DEBUG_LOG).parent() {
                let _ = fs::create_dir_all(parent);
            }

            match fern::log_file(DEBUG_LOG) {
                Ok(log) => logger = logger.chain(log),
                Err(why) => {
                    eprintln!("failed to create log file at {}: {}", DEBUG_LOG, why);
                }
            };

            if let Some(home) = dirs::home_dir() {
                match fern::log_file(&home.join("installer.log")) {
                    Ok(log) => logger = logger.chain(log),
                    Err(why) => {
                        eprintln!("failed to set up logging for the home directory: {}", why);
                    }
                }
            }

            logger
        })
        .apply()?;

    Ok(())
}
