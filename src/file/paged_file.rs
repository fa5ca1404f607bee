use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::error::{FileError, FileResult};
use super::{PAGE_SIZE, PageNo};

/// A table file viewed as an array of `PAGE_SIZE` pages
#[derive(Debug)]
pub struct PagedFile {
    file: File,
    path: PathBuf,
}

impl PagedFile {
    /// Create a new, empty file. Fails if the file already exists.
    pub fn create<P: AsRef<Path>>(path: P) -> FileResult<Self> {
        let path = path.as_ref();

        if path.exists() {
            return Err(FileError::FileAlreadyExists(path.display().to_string()));
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Open an existing file for reading and writing
    pub fn open<P: AsRef<Path>>(path: P) -> FileResult<Self> {
        let path_ref = path.as_ref();
        let path = path_ref
            .canonicalize()
            .map_err(|_| FileError::FileNotFound(path_ref.display().to_string()))?;

        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        Ok(Self { file, path })
    }

    /// Path of the underlying file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read a page into `buffer`. Pages past the end of the file read as zeros.
    pub fn read_page(&mut self, page_no: PageNo, buffer: &mut [u8]) -> FileResult<()> {
        check_page_size(buffer.len())?;

        let offset = (page_no * PAGE_SIZE) as u64;
        self.file.seek(SeekFrom::Start(offset))?;

        let mut filled = 0;
        while filled < PAGE_SIZE {
            match self.file.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        buffer[filled..].fill(0);

        Ok(())
    }

    /// Write a page, extending the file if the page lies past its end
    pub fn write_page(&mut self, page_no: PageNo, buffer: &[u8]) -> FileResult<()> {
        check_page_size(buffer.len())?;

        let offset = (page_no * PAGE_SIZE) as u64;
        let required_size = offset + PAGE_SIZE as u64;

        if self.file.metadata()?.len() < required_size {
            self.file.set_len(required_size)?;
        }

        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buffer)?;

        Ok(())
    }

    /// Append a page at the end of the file and return its page number
    pub fn append_page(&mut self, buffer: &[u8]) -> FileResult<PageNo> {
        let page_no = self.page_count()?;
        self.write_page(page_no, buffer)?;
        Ok(page_no)
    }

    /// Number of pages in the file
    pub fn page_count(&self) -> FileResult<usize> {
        let file_size = self.file.metadata()?.len();
        Ok(file_size.div_ceil(PAGE_SIZE as u64) as usize)
    }

    /// Flush OS buffers for this file to disk
    pub fn sync(&self) -> FileResult<()> {
        self.file.sync_data()?;
        Ok(())
    }
}

fn check_page_size(actual: usize) -> FileResult<()> {
    if actual != PAGE_SIZE {
        return Err(FileError::InvalidPageSize {
            expected: PAGE_SIZE,
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_test_dir() -> TempDir {
        tempfile::tempdir().unwrap()
    }

    #[test]
    fn test_create_file() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("nested").join("test.tbl");

        let file = PagedFile::create(&test_file).unwrap();
        assert!(test_file.exists());
        assert_eq!(file.page_count().unwrap(), 0);
    }

    #[test]
    fn test_create_file_already_exists() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("test.tbl");

        PagedFile::create(&test_file).unwrap();
        let result = PagedFile::create(&test_file);
        assert!(matches!(result, Err(FileError::FileAlreadyExists(_))));
    }

    #[test]
    fn test_open_nonexistent_file() {
        let temp_dir = setup_test_dir();
        let result = PagedFile::open(temp_dir.path().join("missing.tbl"));
        assert!(matches!(result, Err(FileError::FileNotFound(_))));
    }

    #[test]
    fn test_read_write_page() {
        let temp_dir = setup_test_dir();
        let mut file = PagedFile::create(temp_dir.path().join("test.tbl")).unwrap();

        let mut write_buffer = vec![0u8; PAGE_SIZE];
        write_buffer[0] = 42;
        write_buffer[PAGE_SIZE - 1] = 255;
        file.write_page(3, &write_buffer).unwrap();

        let mut read_buffer = vec![7u8; PAGE_SIZE];
        file.read_page(3, &mut read_buffer).unwrap();
        assert_eq!(read_buffer, write_buffer);

        // Writing page 3 extends the file over pages 0..=3
        assert_eq!(file.page_count().unwrap(), 4);
    }

    #[test]
    fn test_read_past_end_is_zeroed() {
        let temp_dir = setup_test_dir();
        let mut file = PagedFile::create(temp_dir.path().join("test.tbl")).unwrap();

        let mut buffer = vec![9u8; PAGE_SIZE];
        file.read_page(100, &mut buffer).unwrap();
        assert!(buffer.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_append_page() {
        let temp_dir = setup_test_dir();
        let mut file = PagedFile::create(temp_dir.path().join("test.tbl")).unwrap();

        let buffer = vec![1u8; PAGE_SIZE];
        assert_eq!(file.append_page(&buffer).unwrap(), 0);
        assert_eq!(file.append_page(&buffer).unwrap(), 1);
        assert_eq!(file.page_count().unwrap(), 2);
    }

    #[test]
    fn test_reopen_keeps_pages() {
        let temp_dir = setup_test_dir();
        let path = temp_dir.path().join("test.tbl");

        {
            let mut file = PagedFile::create(&path).unwrap();
            let mut buffer = vec![0u8; PAGE_SIZE];
            buffer[10] = 77;
            file.write_page(0, &buffer).unwrap();
            file.sync().unwrap();
        }

        let mut file = PagedFile::open(&path).unwrap();
        let mut buffer = vec![0u8; PAGE_SIZE];
        file.read_page(0, &mut buffer).unwrap();
        assert_eq!(buffer[10], 77);
    }

    #[test]
    fn test_invalid_buffer_size() {
        let temp_dir = setup_test_dir();
        let mut file = PagedFile::create(temp_dir.path().join("test.tbl")).unwrap();

        let mut small_buffer = vec![0u8; PAGE_SIZE - 1];
        let result = file.read_page(0, &mut small_buffer);
        assert!(matches!(result, Err(FileError::InvalidPageSize { .. })));

        let large_buffer = vec![0u8; PAGE_SIZE + 1];
        let result = file.write_page(0, &large_buffer);
        assert!(matches!(result, Err(FileError::InvalidPageSize { .. })));
    }
}
