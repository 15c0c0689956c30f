use std::{io, path::PathBuf};

#[derive(Debug, Fail)]
pub(crate) enum CliError {
    #[fail(display = "failed to load configuration from {:?}: {}", path, why)]
    Config { path: PathBuf, why: io::Error },
    #[fail(display = "failed to load preseeded answers from {:?}: {}", path, why)]
    Answers { path: PathBuf, why: io::Error },
    #[fail(display = "{} is not a directory", path)]
    NotADirectory { path: String },
}
