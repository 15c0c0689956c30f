//! Miscellanious file functions used by the installer and its crates.

use std::{
    collections::BTreeSet,
    fs::{self, File, OpenOptions},
    io::{self, BufRead, BufReader, Read, Write},
    path::Path,
};

fn annotate<P: AsRef<Path>>(action: &str, path: P) -> impl FnOnce(io::Error) -> io::Error {
    let path = path.as_ref().to_path_buf();
    let action = action.to_owned();
    move |why| io::Error::new(why.kind(), format!("unable to {} {:?}: {}", action, path, why))
}

pub fn open<P: AsRef<Path>>(path: P) -> io::Result<File> {
    File::open(&path).map_err(annotate("open file at", &path))
}

pub fn create<P: AsRef<Path>>(path: P) -> io::Result<File> {
    File::create(&path).map_err(annotate("create file at", &path))
}

/// Open a file for appending, creating it and its parent directories when missing.
pub fn append<P: AsRef<Path>>(path: P) -> io::Result<File> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(annotate("create directory", parent))?;
    }

    OpenOptions::new().create(true).append(true).open(path).map_err(annotate("append to", path))
}

pub fn read<P: AsRef<Path>>(path: P) -> io::Result<Vec<u8>> {
    open(path).and_then(|mut file| {
        let mut buffer = Vec::with_capacity(file.metadata().ok().map_or(0, |x| x.len()) as usize);
        file.read_to_end(&mut buffer).map(|_| buffer)
    })
}

pub fn write<P: AsRef<Path>, C: AsRef<[u8]>>(path: P, contents: C) -> io::Result<()> {
    create(path).and_then(|mut file| file.write_all(contents.as_ref()))
}

/// Append each line to the file at `path`, creating it if necessary.
pub fn append_lines<P: AsRef<Path>, S: AsRef<str>, I: IntoIterator<Item = S>>(
    path: P,
    lines: I,
) -> io::Result<()> {
    let mut file = append(path)?;
    for line in lines {
        writeln!(file, "{}", line.as_ref())?;
    }
    file.flush()
}

/// Collect the trimmed, non-empty lines of a file into a set.
///
/// A file which does not exist yields an empty set.
pub fn read_line_set<P: AsRef<Path>>(path: P) -> io::Result<BTreeSet<String>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(BTreeSet::new());
    }

    let mut set = BTreeSet::new();
    for line in BufReader::new(open(path)?).lines() {
        let line = line.map_err(annotate("read", path))?;
        let line = line.trim();
        if !line.is_empty() {
            set.insert(line.to_owned());
        }
    }

    Ok(set)
}

/// Read the first whitespace-delimited field of each line in a package
/// manifest, skipping blank lines and `#` comments.
pub fn read_manifest<P: AsRef<Path>>(path: P) -> io::Result<BTreeSet<String>> {
    let path = path.as_ref();
    let mut set = BTreeSet::new();
    for line in BufReader::new(open(path)?).lines() {
        let line = line.map_err(annotate("read", path))?;
        if line.starts_with('#') {
            continue;
        }

        if let Some(package) = line.split_whitespace().next() {
            set.insert(package.to_owned());
        }
    }

    Ok(set)
}

#[cfg(test)]
mod tests {
    extern crate tempdir;
    use self::tempdir::TempDir;
    use super::*;

    #[test]
    fn append_creates_parents_and_accumulates() {
        let tempdir = TempDir::new("ubiquity_utils").unwrap();
        let path = tempdir.path().join("var/lib/ubiquity/apt-installed");
        append_lines(&path, &["language-pack-de", "language-support-de"]).unwrap();
        append_lines(&path, &["hunspell-de-de"]).unwrap();

        let contents = String::from_utf8(read(&path).unwrap()).unwrap();
        assert_eq!(contents, "language-pack-de\nlanguage-support-de\nhunspell-de-de\n");
    }

    #[test]
    fn line_set_of_missing_file_is_empty() {
        let tempdir = TempDir::new("ubiquity_utils").unwrap();
        assert!(read_line_set(tempdir.path().join("remove-kernels")).unwrap().is_empty());
    }

    #[test]
    fn line_set_trims_and_skips_blanks() {
        let tempdir = TempDir::new("ubiquity_utils").unwrap();
        let path = tempdir.path().join("remove-kernels");
        write(&path, "linux-image-generic  \n\n  linux-image-386\n").unwrap();

        let set = read_line_set(&path).unwrap();
        assert_eq!(
            set.into_iter().collect::<Vec<_>>(),
            vec!["linux-image-386".to_owned(), "linux-image-generic".to_owned()]
        );
    }

    #[test]
    fn manifest_takes_first_field() {
        let tempdir = TempDir::new("ubiquity_utils").unwrap();
        let path = tempdir.path().join("filesystem.manifest");
        write(&path, "# comment\nubiquity 1.0\n\ncasper\t1.2\n").unwrap();

        let set = read_manifest(&path).unwrap();
        assert!(set.contains("ubiquity"));
        assert!(set.contains("casper"));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn open_error_names_path() {
        let err = open("/nonexistent/ubiquity").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(err.to_string().contains("/nonexistent/ubiquity"));
    }
}
