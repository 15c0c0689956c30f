extern crate clap;
extern crate failure;
#[macro_use]
extern crate failure_derive;
extern crate libc;
extern crate pbr;
extern crate ubiquity;

mod errors;
mod progress;

use self::{errors::CliError, progress::TerminalSink};
use clap::{App, Arg, ArgMatches};
use std::{
    collections::BTreeMap,
    io,
    path::{Path, PathBuf},
    process::exit,
    sync::atomic::Ordering,
};
use ubiquity::{
    installer::{steps::TargetSteps, CHECK_FOR_UPDATES},
    Config, ConfigSource, InstallDriver, PreseedAnswers, ProcessRunner, KILL_SWITCH,
};

fn main() {
    let matches = App::new("ubiquity-install")
        .about("Installs the live system onto a target which has already been mounted")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .help("a file of KEY=value pairs which override the default configuration")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("answers")
                .short("a")
                .long("answers")
                .help("a file of question=value pairs answering the installer's questions")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("source")
                .short("s")
                .long("source")
                .help("the root of the file system which will be copied")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("target")
                .short("t")
                .long("target")
                .help("where the root file system of the new installation is mounted")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("check-for-updates")
                .long("check-for-updates")
                .help("upgrade the installer's own packages before installing"),
        )
        .get_matches();

    if let Err(err) = ubiquity::log(|_level, _message| ()) {
        eprintln!("failed to initialize logging: {}", err);
    }

    configure_signal_handling();

    let config = match config(&matches) {
        Ok(config) => config,
        Err(why) => {
            eprintln!("ubiquity-install: {}", why);
            exit(1);
        }
    };

    let preseed = match matches.value_of("answers").map(Path::new) {
        Some(path) => match PreseedAnswers::load(path) {
            Ok(answers) => Some(answers),
            Err(why) => {
                eprintln!("ubiquity-install: {}", CliError::Answers { path: path.into(), why });
                exit(1);
            }
        },
        None => None,
    };

    let unanswered: BTreeMap<String, String> = BTreeMap::new();
    let answers: &dyn ConfigSource = match preseed {
        Some(ref answers) => answers,
        None => &unanswered,
    };

    let mut sink = TerminalSink::new();
    let mut driver = InstallDriver::new(TargetSteps::new(config, answers, ProcessRunner));
    let result = driver.run(&mut sink);
    sink.finish();

    let status = match result {
        Ok(()) => {
            println!("install was successful");
            0
        }
        Err(why) => {
            println!("install failed ({}): {}", why.message_key(), why);
            1
        }
    };

    exit(status);
}

fn config(matches: &ArgMatches) -> Result<Config, CliError> {
    let mut config = match matches.value_of("config").map(PathBuf::from) {
        Some(path) => Config::load(&path).map_err(|why| CliError::Config { path, why })?,
        None => Config::default(),
    };

    if let Some(source) = matches.value_of("source") {
        config.source = PathBuf::from(source);
    }

    if let Some(target) = matches.value_of("target") {
        config.target = directory(target)?;
    }

    if matches.is_present("check-for-updates") {
        config.flags |= CHECK_FOR_UPDATES;
    }

    Ok(config)
}

fn directory(path: &str) -> Result<PathBuf, CliError> {
    let dir = PathBuf::from(path);
    if dir.is_dir() {
        Ok(dir)
    } else {
        Err(CliError::NotADirectory { path: path.into() })
    }
}

fn configure_signal_handling() {
    extern "C" fn handler(signal: i32) {
        match signal {
            libc::SIGINT => KILL_SWITCH.store(true, Ordering::SeqCst),
            _ => unreachable!(),
        }
    }

    if unsafe { libc::signal(libc::SIGINT, handler as libc::sighandler_t) == libc::SIG_ERR } {
        eprintln!("ubiquity-install: signal handling error: {}", io::Error::last_os_error());
        exit(1);
    }
}
