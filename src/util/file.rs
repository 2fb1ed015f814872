use std::{fs, io, path::Path};

/// Total size of a directory on disk in bytes.
pub fn dir_disk_size<P>(dir_path: P) -> u64
where
  P: AsRef<Path>,
{
  fs_extra::dir::get_size(dir_path).unwrap_or_default()
}

/// Free space on the filesystem holding `dir_path`.
pub fn available_disk_space<P>(dir_path: P) -> u64
where
  P: AsRef<Path>,
{
  fs2::available_space(dir_path).unwrap_or_default()
}

/// Recursively copy `src` into `dst`, skipping any entry whose file name is
/// listed in `exclude`.
pub fn copy_dir<P, Q>(src: P, dst: Q, exclude: &[&str]) -> io::Result<()>
where
  P: AsRef<Path>,
  Q: AsRef<Path>,
{
  if !dst.as_ref().is_dir() {
    fs::create_dir_all(&dst)?;
  }

  for entry in fs::read_dir(&src)? {
    let entry = entry?;
    let file_name = entry.file_name();
    if exclude
      .iter()
      .any(|name| file_name.to_string_lossy() == *name)
    {
      continue;
    }

    let src_path = entry.path();
    let dst_path = dst.as_ref().join(&file_name);
    if src_path.is_dir() {
      copy_dir(&src_path, &dst_path, exclude)?;
    } else {
      fs::copy(&src_path, &dst_path)?;
    }
  }
  Ok(())
}
