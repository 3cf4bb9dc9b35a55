use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use log::{debug, info};

use crate::runtime::vfs::{Vfs, VfsPath};

/// Copies the host directory `src` into `vfs` under `dst`, recursively.
/// Returns the number of file bytes copied. The guest only ever sees the
/// copy.
pub fn preload_host_dir(vfs: &Vfs, src: &Path, dst: &VfsPath) -> Result<u64> {
    if !src.is_dir() {
        return Err(anyhow!("preload directory {:?} does not exist", src));
    }
    vfs.mkdirp(dst).with_context(|| format!("cannot create {} in the vfs", dst))?;
    let copied = copy_dir_recursive(vfs, src, dst)?;
    info!("Preloaded {:?} into {} ({} bytes)", src, dst, copied);
    Ok(copied)
}

fn copy_dir_recursive(vfs: &Vfs, src: &Path, dst: &VfsPath) -> Result<u64> {
    let mut copied = 0;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let src_path = entry.path();
        let name = entry
            .file_name()
            .into_string()
            .map_err(|name| anyhow!("non UTF-8 file name {:?} in {:?}", name, src))?;
        let dst_path = dst.join(&name);
        if file_type.is_dir() {
            vfs.mkdirp(&dst_path)?;
            copied += copy_dir_recursive(vfs, &src_path, &dst_path)?;
        } else {
            let contents = fs::read(&src_path).with_context(|| format!("reading {:?}", src_path))?;
            copied += contents.len() as u64;
            vfs.write_file(&dst_path, contents)?;
            debug!("preload: {:?} -> {}", src_path, dst_path);
        }
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copies_nested_tree_into_the_vfs() {
        let host = std::env::temp_dir().join(format!("wasi-shim-preload-{}", std::process::id()));
        fs::create_dir_all(host.join("nested")).unwrap();
        fs::write(host.join("a.txt"), b"alpha").unwrap();
        fs::write(host.join("nested/b.txt"), b"beta!").unwrap();

        let vfs = Vfs::new();
        let root = VfsPath::parse("/data").unwrap();
        let copied = preload_host_dir(&vfs, &host, &root).unwrap();
        fs::remove_dir_all(&host).unwrap();

        assert_eq!(copied, 10);
        assert_eq!(vfs.read_file(&root.join("a.txt")).unwrap(), b"alpha");
        assert_eq!(vfs.read_file(&root.join("nested").join("b.txt")).unwrap(), b"beta!");
    }

    #[test]
    fn missing_host_directory_is_an_error() {
        let vfs = Vfs::new();
        let missing = Path::new("/definitely/not/here/wasi-shim");
        assert!(preload_host_dir(&vfs, missing, &VfsPath::root()).is_err());
    }
}
