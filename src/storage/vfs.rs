//! # Virtual file system
//!
//! Block stores reach the disk only through [`FileSystem`] and [`File`], so that tests can run
//! the same code against [`MemoryFileSystem`].

use fs2::FileExt;
use std::cell;
use std::collections;
use std::fmt;
use std::fs;
use std::io::{self, Read as _, Seek as _, Write as _};
use std::path;
use std::rc;

/// # File system interface
///
/// Naming, creating, listing and removing the files of one directory.
pub trait FileSystem {
  /// The type of errors that can occur when interacting with this file system.
  type Error: fmt::Debug + fmt::Display;

  /// The type of paths that this file system uses.
  type Path: ?Sized + ToOwned;

  /// The type of open files.
  type File: File<Error = Self::Error>;

  /// Returns the path of the entry called `name` inside the directory `dir`.
  fn join(&self, dir: &Self::Path, name: &str) -> <Self::Path as ToOwned>::Owned;

  /// Opens the file at `path` for reading and writing, creating it empty if it does not exist.
  fn open(&mut self, path: &Self::Path) -> Result<Self::File, Self::Error>;

  /// Returns whether a file exists at `path`.
  fn exists(&mut self, path: &Self::Path) -> Result<bool, Self::Error>;

  /// Deletes the file at `path`. Returns whether there was a file to delete; a missing file is
  /// not an error.
  fn delete(&mut self, path: &Self::Path) -> Result<bool, Self::Error>;

  /// Returns the names of the entries in the directory `dir`.
  fn list(&mut self, dir: &Self::Path) -> Result<Vec<String>, Self::Error>;
}

/// # File interface
///
/// Whole-file reads and positioned writes, plus an advisory exclusive lock.
pub trait File {
  /// The type of errors that can occur when interacting with this file.
  type Error: fmt::Debug + fmt::Display;

  /// Returns the size of the file in bytes.
  fn size(&mut self) -> Result<u64, Self::Error>;

  /// Reads the whole file.
  fn read_all(&mut self) -> Result<Vec<u8>, Self::Error>;

  /// Writes `bytes` starting at `offset`, growing the file if it ends before them.
  fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<(), Self::Error>;

  /// Cuts the file down (or zero-extends it) to `size` bytes.
  fn set_size(&mut self, size: u64) -> Result<(), Self::Error>;

  /// Takes the exclusive lock, failing immediately if it is held through another handle.
  fn try_lock(&mut self) -> Result<(), Self::Error>;

  /// Gives up the exclusive lock.
  fn unlock(&mut self) -> Result<(), Self::Error>;
}

/// # Operating system file system
///
/// Block files are ordinary files in a directory; locks are advisory locks taken through
/// [`fs2`].
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardFileSystem;

impl FileSystem for StandardFileSystem {
  type Error = io::Error;
  type Path = path::Path;
  type File = StandardFile;

  fn join(&self, dir: &path::Path, name: &str) -> path::PathBuf {
    dir.join(name)
  }

  fn open(&mut self, path: &path::Path) -> io::Result<StandardFile> {
    let inner = fs::OpenOptions::new().read(true).write(true).create(true).truncate(false).open(path)?;
    Ok(StandardFile { inner })
  }

  fn exists(&mut self, path: &path::Path) -> io::Result<bool> {
    path.try_exists()
  }

  fn delete(&mut self, path: &path::Path) -> io::Result<bool> {
    match fs::remove_file(path) {
      Ok(()) => Ok(true),
      Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
      Err(err) => Err(err),
    }
  }

  fn list(&mut self, dir: &path::Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
      // Names that are not valid UTF-8 cannot belong to a namespace.
      if let Ok(name) = entry?.file_name().into_string() {
        names.push(name);
      }
    }
    Ok(names)
  }
}

/// An open file of [`StandardFileSystem`].
#[derive(Debug)]
pub struct StandardFile {
  inner: fs::File,
}

impl File for StandardFile {
  type Error = io::Error;

  fn size(&mut self) -> io::Result<u64> {
    Ok(self.inner.metadata()?.len())
  }

  fn read_all(&mut self) -> io::Result<Vec<u8>> {
    self.inner.rewind()?;
    let mut bytes = Vec::new();
    self.inner.read_to_end(&mut bytes)?;
    Ok(bytes)
  }

  fn write_at(&mut self, offset: u64, bytes: &[u8]) -> io::Result<()> {
    self.inner.seek(io::SeekFrom::Start(offset))?;
    self.inner.write_all(bytes)
  }

  fn set_size(&mut self, size: u64) -> io::Result<()> {
    self.inner.set_len(size)
  }

  fn try_lock(&mut self) -> io::Result<()> {
    FileExt::try_lock_exclusive(&self.inner)
  }

  fn unlock(&mut self) -> io::Result<()> {
    FileExt::unlock(&self.inner)
  }
}

#[derive(Debug, Default)]
struct Contents {
  bytes: Vec<u8>,
  locked: bool,
}

type SharedContents = rc::Rc<cell::RefCell<Contents>>;

/// # In-memory file system
///
/// Paths are `/`-separated strings and directories exist implicitly. Clones share the same set
/// of files, so a clone kept aside can inspect what a deque left behind after the deque is gone.
#[derive(Debug, Default, Clone)]
pub struct MemoryFileSystem {
  files: rc::Rc<cell::RefCell<collections::HashMap<String, SharedContents>>>,
}

impl MemoryFileSystem {
  /// Returns the total number of files.
  pub fn len(&self) -> usize {
    self.files.borrow().len()
  }

  /// Returns whether there are no files at all.
  pub fn is_empty(&self) -> bool {
    self.files.borrow().is_empty()
  }
}

impl FileSystem for MemoryFileSystem {
  type Error = String;
  type Path = str;
  type File = MemoryFile;

  fn join(&self, dir: &str, name: &str) -> String {
    if dir.is_empty() {
      name.to_owned()
    } else {
      format!("{}/{name}", dir.trim_end_matches('/'))
    }
  }

  fn open(&mut self, path: &str) -> Result<MemoryFile, String> {
    let contents = self.files.borrow_mut().entry(path.to_owned()).or_default().clone();
    Ok(MemoryFile { contents })
  }

  fn exists(&mut self, path: &str) -> Result<bool, String> {
    Ok(self.files.borrow().contains_key(path))
  }

  fn delete(&mut self, path: &str) -> Result<bool, String> {
    Ok(self.files.borrow_mut().remove(path).is_some())
  }

  fn list(&mut self, dir: &str) -> Result<Vec<String>, String> {
    let prefix = self.join(dir, "");
    let files = self.files.borrow();
    let names = files
      .keys()
      .filter_map(|path| path.strip_prefix(prefix.as_str()))
      .filter(|name| !name.is_empty() && !name.contains('/'))
      .map(str::to_owned)
      .collect();
    Ok(names)
  }
}

/// An open file of [`MemoryFileSystem`]. Stays usable after the file is deleted, like an open
/// file on Unix.
#[derive(Debug)]
pub struct MemoryFile {
  contents: SharedContents,
}

impl File for MemoryFile {
  type Error = String;

  fn size(&mut self) -> Result<u64, String> {
    Ok(self.contents.borrow().bytes.len() as u64)
  }

  fn read_all(&mut self) -> Result<Vec<u8>, String> {
    Ok(self.contents.borrow().bytes.clone())
  }

  fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<(), String> {
    let start = usize::try_from(offset).map_err(|err| format!("write offset {offset}: {err}"))?;
    let end = start + bytes.len();
    let mut contents = self.contents.borrow_mut();
    if contents.bytes.len() < end {
      contents.bytes.resize(end, 0);
    }
    contents.bytes[start..end].copy_from_slice(bytes);
    Ok(())
  }

  fn set_size(&mut self, size: u64) -> Result<(), String> {
    let size = usize::try_from(size).map_err(|err| format!("file size {size}: {err}"))?;
    self.contents.borrow_mut().bytes.resize(size, 0);
    Ok(())
  }

  fn try_lock(&mut self) -> Result<(), String> {
    let mut contents = self.contents.borrow_mut();
    if contents.locked {
      return Err("file is locked through another handle".to_owned());
    }
    contents.locked = true;
    Ok(())
  }

  fn unlock(&mut self) -> Result<(), String> {
    let mut contents = self.contents.borrow_mut();
    if !contents.locked {
      return Err("file is not locked".to_owned());
    }
    contents.locked = false;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::borrow::Borrow;

  fn check_open_keeps_contents<F: FileSystem>(fs: &mut F, dir: &F::Path) {
    let path = fs.join(dir, "block");
    assert!(!fs.exists(path.borrow()).unwrap());

    let mut file = fs.open(path.borrow()).unwrap();
    assert!(fs.exists(path.borrow()).unwrap());
    assert!(file.read_all().unwrap().is_empty());
    file.write_at(0, b"records").unwrap();

    let mut reopened = fs.open(path.borrow()).unwrap();
    assert_eq!(reopened.size().unwrap(), 7);
    assert_eq!(reopened.read_all().unwrap(), b"records");
  }

  fn check_delete_reports_presence<F: FileSystem>(fs: &mut F, dir: &F::Path) {
    let path = fs.join(dir, "block");
    assert!(!fs.delete(path.borrow()).unwrap());
    fs.open(path.borrow()).unwrap();
    assert!(fs.delete(path.borrow()).unwrap());
    assert!(!fs.exists(path.borrow()).unwrap());
  }

  fn check_list<F: FileSystem>(fs: &mut F, dir: &F::Path) {
    for name in ["t0", "t1", "tdata.lock"] {
      let path = fs.join(dir, name);
      fs.open(path.borrow()).unwrap();
    }
    let mut names = fs.list(dir).unwrap();
    names.sort();
    assert_eq!(names, vec!["t0", "t1", "tdata.lock"]);
  }

  fn check_write_at_and_set_size<F: File>(file: &mut F) {
    file.write_at(0, b"abcdef").unwrap();
    file.write_at(4, b"XYZ").unwrap();
    assert_eq!(file.read_all().unwrap(), b"abcdXYZ");
    file.write_at(9, b"!").unwrap();
    assert_eq!(file.read_all().unwrap(), b"abcdXYZ\0\0!");

    file.set_size(2).unwrap();
    assert_eq!(file.size().unwrap(), 2);
    assert_eq!(file.read_all().unwrap(), b"ab");
  }

  fn check_exclusive_lock<F: File>(first: &mut F, second: &mut F) {
    first.try_lock().unwrap();
    second.try_lock().unwrap_err();
    first.unlock().unwrap();
    second.try_lock().unwrap();
    second.unlock().unwrap();
  }

  #[test]
  fn test_standard_open_keeps_contents() {
    let tempdir = tempfile::tempdir().unwrap();
    check_open_keeps_contents(&mut StandardFileSystem, tempdir.path());
  }

  #[test]
  fn test_standard_delete_reports_presence() {
    let tempdir = tempfile::tempdir().unwrap();
    check_delete_reports_presence(&mut StandardFileSystem, tempdir.path());
  }

  #[test]
  fn test_standard_list() {
    let tempdir = tempfile::tempdir().unwrap();
    check_list(&mut StandardFileSystem, tempdir.path());
  }

  #[test]
  fn test_standard_write_at_and_set_size() {
    let tempdir = tempfile::tempdir().unwrap();
    let mut file = StandardFileSystem.open(&tempdir.path().join("block")).unwrap();
    check_write_at_and_set_size(&mut file);
  }

  #[test]
  fn test_standard_exclusive_lock() {
    let tempdir = tempfile::tempdir().unwrap();
    let path = tempdir.path().join("tdata.lock");
    let mut first = StandardFileSystem.open(&path).unwrap();
    let mut second = StandardFileSystem.open(&path).unwrap();
    check_exclusive_lock(&mut first, &mut second);
  }

  #[test]
  fn test_memory_open_keeps_contents() {
    check_open_keeps_contents(&mut MemoryFileSystem::default(), "root");
  }

  #[test]
  fn test_memory_delete_reports_presence() {
    check_delete_reports_presence(&mut MemoryFileSystem::default(), "root");
  }

  #[test]
  fn test_memory_list() {
    let mut fs = MemoryFileSystem::default();
    fs.open("other/t2").unwrap();
    fs.open("root/nested/t3").unwrap();
    check_list(&mut fs, "root");
  }

  #[test]
  fn test_memory_write_at_and_set_size() {
    let mut file = MemoryFileSystem::default().open("block").unwrap();
    check_write_at_and_set_size(&mut file);
  }

  #[test]
  fn test_memory_exclusive_lock() {
    let mut fs = MemoryFileSystem::default();
    let mut first = fs.open("tdata.lock").unwrap();
    let mut second = fs.open("tdata.lock").unwrap();
    check_exclusive_lock(&mut first, &mut second);
  }

  #[test]
  fn test_memory_clones_share_files() {
    let mut fs = MemoryFileSystem::default();
    let observer = fs.clone();
    fs.open("root/t0").unwrap();
    assert_eq!(observer.len(), 1);
    fs.delete("root/t0").unwrap();
    assert!(observer.is_empty());
  }
}
