//! Removal of kernels which cannot boot the installed hardware, and repair of
//! the boot image symlinks afterwards.

use crate::{
    installer::HelperRunner,
    packages::{CommitError, DependencyCache, PackageCache},
    progress::ProgressSink,
};
use std::{
    fs, io,
    os::unix::fs::symlink,
    path::{Path, PathBuf},
};

const TITLE: &str = "ubiquity/install/title";

#[derive(Debug, Fail)]
pub enum KernelError {
    #[fail(display = "failed to read kernels to remove from {:?}: {}", path, why)]
    List { path: PathBuf, why: io::Error },
    #[fail(display = "failed to remove unusable kernels: {}", why)]
    Remove { why: CommitError },
    #[fail(display = "package manager did not complete the removal of unusable kernels")]
    Incomplete,
    #[fail(display = "failed to {} {:?}: {}", action, path, why)]
    Symlink { action: &'static str, path: PathBuf, why: io::Error },
}

/// Whether an entry is a boot image symlink, such as `vmlinuz` or `initrd.img`.
fn is_image_link(name: &str) -> bool {
    name.starts_with("vmlinux") || name.starts_with("vmlinuz") || name == "initrd.img"
}

/// The image type of a versioned boot image, such as `vmlinuz-4.15.0-20-generic`.
fn image_type(name: &str) -> Option<&'static str> {
    ["vmlinux", "vmlinuz", "initrd.img"]
        .iter()
        .find(|kind| name.starts_with(*kind) && name[kind.len()..].starts_with('-'))
        .cloned()
}

fn remove_image_links(dir: &Path) -> Result<(), KernelError> {
    let entries = fs::read_dir(dir).map_err(|why| KernelError::Symlink {
        action: "read directory",
        path: dir.to_path_buf(),
        why,
    })?;

    for entry in entries.filter_map(Result::ok) {
        let name = entry.file_name();
        let is_link = entry.file_type().map(|kind| kind.is_symlink()).unwrap_or(false);
        if is_link && name.to_str().map_or(false, is_image_link) {
            let path = entry.path();
            debug!("removing boot image link {}", path.display());
            fs::remove_file(&path).map_err(|why| KernelError::Symlink {
                action: "remove",
                path,
                why,
            })?;
        }
    }

    Ok(())
}

/// Recreate the `vmlinuz` and `initrd.img` symlinks of a target.
///
/// Links live in `/boot` when `link_in_boot` is set, and in the root of the
/// target otherwise. Images for `kernel_version` are preferred, but any image
/// will be linked if that version is not installed.
pub fn relink_images(target: &Path, kernel_version: &str, link_in_boot: bool) -> Result<(), KernelError> {
    let boot = target.join("boot");
    let (link_dir, link_prefix) =
        if link_in_boot { (boot.clone(), Path::new("")) } else { (target.to_path_buf(), Path::new("boot")) };

    remove_image_links(&link_dir)?;
    if link_dir != target {
        remove_image_links(target)?;
    }

    let mut images = fs::read_dir(&boot)
        .map_err(|why| KernelError::Symlink { action: "read directory", path: boot.clone(), why })?
        .filter_map(Result::ok)
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect::<Vec<String>>();
    images.sort();

    let suffix = ["-", kernel_version].concat();
    for image in images {
        let kind = match image_type(&image) {
            Some(kind) => kind,
            None => continue,
        };

        let link = link_dir.join(kind);
        if link.symlink_metadata().is_ok() {
            if !image.ends_with(&suffix) {
                continue;
            }

            fs::remove_file(&link)
                .map_err(|why| KernelError::Symlink { action: "remove", path: link.clone(), why })?;
        }

        let source = link_prefix.join(&image);
        info!("linking {} to {}", link.display(), source.display());
        symlink(&source, &link).map_err(|why| KernelError::Symlink { action: "create", path: link, why })?;
    }

    Ok(())
}

/// Removes kernel packages that an external classifier flagged as unusable.
pub struct KernelPruner<'a> {
    pub target:         &'a Path,
    pub kernel_version: &'a str,
    /// Where the classifier writes the names of kernels to remove.
    pub remove_list:    &'a Path,
    pub link_in_boot:   bool,
    /// The command line of the classifier.
    pub classifier:     &'a [String],
}

impl<'a> KernelPruner<'a> {
    pub fn prune<C: DependencyCache>(
        &self,
        runner: &mut dyn HelperRunner,
        cache: &mut PackageCache<C>,
        sink: &mut dyn ProgressSink,
    ) -> Result<(), KernelError> {
        sink.start(0, 6, TITLE);
        sink.info("ubiquity/install/find_removables");

        if let Err(why) = runner.run(self.classifier, &[]) {
            warn!("kernel classifier failed: {}", why);
        }

        let kernels = ubiquity_utils::read_line_set(self.remove_list).map_err(|why| {
            sink.stop();
            KernelError::List { path: self.remove_list.to_path_buf(), why }
        })?;

        if kernels.is_empty() {
            info!("no unusable kernels to remove");
            sink.stop();
            return Ok(());
        }

        info!("removing unusable kernels: {:?}", kernels);
        sink.set(1);
        sink.region(1, 5);
        match cache.remove(kernels, true, sink) {
            Ok(true) => (),
            Ok(false) => {
                sink.stop();
                return Err(KernelError::Incomplete);
            }
            Err(why) => {
                sink.stop();
                return Err(KernelError::Remove { why });
            }
        }

        sink.set(5);
        let result = relink_images(self.target, self.kernel_version, self.link_in_boot);
        if result.is_ok() {
            sink.set(6);
        }

        sink.stop();
        result
    }
}
