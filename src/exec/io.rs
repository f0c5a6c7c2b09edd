//! Host I/O seams for the processor: console, open file, and filesystem.
//!
//! The processor itself only talks to these traits, so tests can run programs
//! against in-memory doubles while real executions hit stdin/stdout and the
//! actual filesystem.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// The console the processor reads from and writes to.
///
/// Byte-oriented writes must reach the output stream unmodified so that UTF-8
/// sequences assembled byte-by-byte come out intact. The terminal-control hooks
/// default to no-ops; a console that cannot honor them is still a valid console.
pub trait Console {
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()>;
    fn write_str(&mut self, text: &str) -> io::Result<()> {
        self.write_bytes(text.as_bytes())
    }
    /// Blocks until one full character of input is available.
    fn read_char(&mut self) -> io::Result<char>;

    fn clear(&mut self) -> io::Result<()> { Ok(()) }
    fn beep(&mut self) -> io::Result<()> { Ok(()) }
    fn set_cursor_x(&mut self, _x: u64) -> io::Result<()> { Ok(()) }
    fn set_cursor_y(&mut self, _y: u64) -> io::Result<()> { Ok(()) }
    fn cursor_x(&self) -> u64 { 0 }
    fn cursor_y(&self) -> u64 { 0 }
    fn size_x(&self) -> u64 { 80 }
    fn size_y(&self) -> u64 { 24 }
    fn set_foreground(&mut self, _color: u64) -> io::Result<()> { Ok(()) }
    fn set_background(&mut self, _color: u64) -> io::Result<()> { Ok(()) }
    fn reset_colors(&mut self) -> io::Result<()> { Ok(()) }
}

/// Real console backed by stdin/stdout, using ANSI escape sequences for the
/// terminal-control operations. Cursor position queries are not supported
/// without raw terminal mode, so they report the trait defaults.
#[derive(Default)]
pub struct StdConsole;
impl StdConsole {
    pub fn new() -> StdConsole {
        StdConsole
    }
}
impl Console for StdConsole {
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        let stdout = io::stdout();
        let mut stdout = stdout.lock();
        stdout.write_all(bytes)?;
        stdout.flush()
    }
    fn read_char(&mut self) -> io::Result<char> {
        // assemble one UTF-8 character byte-by-byte from stdin
        let mut stdin = io::stdin();
        let mut buf = [0u8; 4];
        stdin.read_exact(&mut buf[..1])?;
        let len = match buf[0] {
            b if b < 0x80 => 1,
            b if b & 0xE0 == 0xC0 => 2,
            b if b & 0xF0 == 0xE0 => 3,
            b if b & 0xF8 == 0xF0 => 4,
            _ => return Err(io::Error::new(io::ErrorKind::InvalidData, "invalid UTF-8 input byte")),
        };
        stdin.read_exact(&mut buf[1..len])?;
        match std::str::from_utf8(&buf[..len]) {
            Ok(s) => s.chars().next()
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "empty input sequence")),
            Err(_) => Err(io::Error::new(io::ErrorKind::InvalidData, "invalid UTF-8 input sequence")),
        }
    }
    fn clear(&mut self) -> io::Result<()> {
        self.write_bytes(b"\x1b[2J\x1b[H")
    }
    fn beep(&mut self) -> io::Result<()> {
        self.write_bytes(b"\x07")
    }
    fn set_cursor_x(&mut self, x: u64) -> io::Result<()> {
        self.write_str(&format!("\x1b[{}G", x + 1))
    }
    fn set_cursor_y(&mut self, y: u64) -> io::Result<()> {
        self.write_str(&format!("\x1b[{}d", y + 1))
    }
    fn set_foreground(&mut self, color: u64) -> io::Result<()> {
        self.write_str(&format!("\x1b[38;5;{}m", color & 0xFF))
    }
    fn set_background(&mut self, color: u64) -> io::Result<()> {
        self.write_str(&format!("\x1b[48;5;{}m", color & 0xFF))
    }
    fn reset_colors(&mut self) -> io::Result<()> {
        self.write_bytes(b"\x1b[0m")
    }
}

/// In-memory console double: scripted input, captured output, tracked cursor and
/// color state. Reading past the scripted input reports end-of-input.
pub struct MemoryConsole {
    pub input: VecDeque<char>,
    pub output: Vec<u8>,
    pub cursor_x: u64,
    pub cursor_y: u64,
    pub width: u64,
    pub height: u64,
    pub foreground: Option<u64>,
    pub background: Option<u64>,
    pub clears: usize,
    pub beeps: usize,
}
impl MemoryConsole {
    pub fn new(input: &str) -> MemoryConsole {
        MemoryConsole {
            input: input.chars().collect(),
            output: vec![],
            cursor_x: 0,
            cursor_y: 0,
            width: 80,
            height: 24,
            foreground: None,
            background: None,
            clears: 0,
            beeps: 0,
        }
    }
    pub fn output_string(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}
impl Console for MemoryConsole {
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.output.extend_from_slice(bytes);
        Ok(())
    }
    fn read_char(&mut self) -> io::Result<char> {
        self.input.pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "console input exhausted"))
    }
    fn clear(&mut self) -> io::Result<()> {
        self.clears += 1;
        Ok(())
    }
    fn beep(&mut self) -> io::Result<()> {
        self.beeps += 1;
        Ok(())
    }
    fn set_cursor_x(&mut self, x: u64) -> io::Result<()> { self.cursor_x = x; Ok(()) }
    fn set_cursor_y(&mut self, y: u64) -> io::Result<()> { self.cursor_y = y; Ok(()) }
    fn cursor_x(&self) -> u64 { self.cursor_x }
    fn cursor_y(&self) -> u64 { self.cursor_y }
    fn size_x(&self) -> u64 { self.width }
    fn size_y(&self) -> u64 { self.height }
    fn set_foreground(&mut self, color: u64) -> io::Result<()> { self.foreground = Some(color); Ok(()) }
    fn set_background(&mut self, color: u64) -> io::Result<()> { self.background = Some(color); Ok(()) }
    fn reset_colors(&mut self) -> io::Result<()> {
        self.foreground = None;
        self.background = None;
        Ok(())
    }
}

/// The one open file the processor may hold.
///
/// Reads walk the content that existed when the file was opened; writes append.
/// Appended bytes do not become readable through the same handle.
pub trait FileHandle {
    fn append(&mut self, bytes: &[u8]) -> io::Result<()>;
    /// `None` once the readable content is exhausted.
    fn read_byte(&mut self) -> io::Result<Option<u8>>;
    fn at_eof(&self) -> bool;
}

/// Filesystem operations the processor can reach. Relative paths resolve against
/// the filesystem's own working directory, not the process-global one.
pub trait FileSystem {
    fn open(&mut self, path: &str) -> io::Result<Box<dyn FileHandle>>;
    fn delete(&mut self, path: &str) -> io::Result<()>;
    fn exists(&self, path: &str) -> bool;
    fn size(&self, path: &str) -> io::Result<u64>;
    fn set_working_dir(&mut self, path: &str) -> io::Result<()>;
    fn working_dir(&self) -> String;
    fn create_dir(&mut self, path: &str) -> io::Result<()>;
    fn delete_dir(&mut self, path: &str, recursive: bool) -> io::Result<()>;
    fn dir_exists(&self, path: &str) -> bool;
    fn copy(&mut self, from: &str, to: &str) -> io::Result<()>;
    fn rename(&mut self, from: &str, to: &str) -> io::Result<()>;
    /// `(files, directories)` directly inside the working directory, sorted.
    fn list_dir(&self) -> io::Result<(Vec<String>, Vec<String>)>;
}

struct OsFile {
    file: fs::File,
    read_pos: u64,
    read_len: u64,
}
impl FileHandle for OsFile {
    fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(bytes)
    }
    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        if self.at_eof() { return Ok(None); }
        self.file.seek(SeekFrom::Start(self.read_pos))?;
        let mut byte = [0u8; 1];
        self.file.read_exact(&mut byte)?;
        self.read_pos += 1;
        Ok(Some(byte[0]))
    }
    fn at_eof(&self) -> bool {
        self.read_pos >= self.read_len
    }
}

/// Real filesystem with its own working directory (the process-global working
/// directory is never touched).
pub struct OsFileSystem {
    cwd: PathBuf,
}
impl OsFileSystem {
    pub fn new() -> OsFileSystem {
        OsFileSystem { cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")) }
    }
    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() { path.to_owned() } else { self.cwd.join(path) }
    }
}
impl Default for OsFileSystem {
    fn default() -> OsFileSystem {
        OsFileSystem::new()
    }
}
impl FileSystem for OsFileSystem {
    fn open(&mut self, path: &str) -> io::Result<Box<dyn FileHandle>> {
        let file = fs::OpenOptions::new().read(true).write(true).create(true)
            .open(self.resolve(path))?;
        let read_len = file.metadata()?.len();
        Ok(Box::new(OsFile { file, read_pos: 0, read_len }))
    }
    fn delete(&mut self, path: &str) -> io::Result<()> {
        fs::remove_file(self.resolve(path))
    }
    fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_file()
    }
    fn size(&self, path: &str) -> io::Result<u64> {
        Ok(fs::metadata(self.resolve(path))?.len())
    }
    fn set_working_dir(&mut self, path: &str) -> io::Result<()> {
        let resolved = self.resolve(path);
        if !resolved.is_dir() {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such directory"));
        }
        self.cwd = resolved;
        Ok(())
    }
    fn working_dir(&self) -> String {
        self.cwd.to_string_lossy().into_owned()
    }
    fn create_dir(&mut self, path: &str) -> io::Result<()> {
        fs::create_dir(self.resolve(path))
    }
    fn delete_dir(&mut self, path: &str, recursive: bool) -> io::Result<()> {
        let resolved = self.resolve(path);
        if recursive { fs::remove_dir_all(resolved) } else { fs::remove_dir(resolved) }
    }
    fn dir_exists(&self, path: &str) -> bool {
        self.resolve(path).is_dir()
    }
    fn copy(&mut self, from: &str, to: &str) -> io::Result<()> {
        fs::copy(self.resolve(from), self.resolve(to)).map(|_| ())
    }
    fn rename(&mut self, from: &str, to: &str) -> io::Result<()> {
        fs::rename(self.resolve(from), self.resolve(to))
    }
    fn list_dir(&self) -> io::Result<(Vec<String>, Vec<String>)> {
        let mut files = vec![];
        let mut dirs = vec![];
        for entry in fs::read_dir(&self.cwd)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type()?.is_dir() { dirs.push(name); } else { files.push(name); }
        }
        files.sort();
        dirs.sort();
        Ok((files, dirs))
    }
}

// ---------------------------------------------------------------------------------

type SharedBytes = Rc<RefCell<Vec<u8>>>;

struct MemoryFile {
    data: SharedBytes,
    read_pos: usize,
    read_len: usize,
}
impl FileHandle for MemoryFile {
    fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.data.borrow_mut().extend_from_slice(bytes);
        Ok(())
    }
    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        if self.at_eof() { return Ok(None); }
        let byte = self.data.borrow()[self.read_pos];
        self.read_pos += 1;
        Ok(Some(byte))
    }
    fn at_eof(&self) -> bool {
        self.read_pos >= self.read_len
    }
}

/// In-memory filesystem double. Paths are plain strings with no hierarchy rules;
/// a "directory" only exists if created, and listing returns everything.
#[derive(Default)]
pub struct MemoryFileSystem {
    pub files: HashMap<String, SharedBytes>,
    pub dirs: HashSet<String>,
    pub cwd: String,
}
impl MemoryFileSystem {
    pub fn new() -> MemoryFileSystem {
        MemoryFileSystem { cwd: "/".to_owned(), ..Default::default() }
    }
    pub fn with_file(mut self, path: &str, content: &[u8]) -> MemoryFileSystem {
        self.files.insert(path.to_owned(), Rc::new(RefCell::new(content.to_vec())));
        self
    }
    pub fn file_content(&self, path: &str) -> Option<Vec<u8>> {
        self.files.get(path).map(|data| data.borrow().clone())
    }
}
impl FileSystem for MemoryFileSystem {
    fn open(&mut self, path: &str) -> io::Result<Box<dyn FileHandle>> {
        let data = self.files.entry(path.to_owned())
            .or_insert_with(|| Rc::new(RefCell::new(vec![])))
            .clone();
        let read_len = data.borrow().len();
        Ok(Box::new(MemoryFile { data, read_pos: 0, read_len }))
    }
    fn delete(&mut self, path: &str) -> io::Result<()> {
        self.files.remove(path)
            .map(|_| ())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))
    }
    fn exists(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }
    fn size(&self, path: &str) -> io::Result<u64> {
        self.files.get(path)
            .map(|data| data.borrow().len() as u64)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))
    }
    fn set_working_dir(&mut self, path: &str) -> io::Result<()> {
        if !self.dirs.contains(path) && path != "/" {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such directory"));
        }
        self.cwd = path.to_owned();
        Ok(())
    }
    fn working_dir(&self) -> String {
        self.cwd.clone()
    }
    fn create_dir(&mut self, path: &str) -> io::Result<()> {
        if !self.dirs.insert(path.to_owned()) {
            return Err(io::Error::new(io::ErrorKind::AlreadyExists, "directory exists"));
        }
        Ok(())
    }
    fn delete_dir(&mut self, path: &str, _recursive: bool) -> io::Result<()> {
        if self.dirs.remove(path) { Ok(()) }
        else { Err(io::Error::new(io::ErrorKind::NotFound, "no such directory")) }
    }
    fn dir_exists(&self, path: &str) -> bool {
        self.dirs.contains(path)
    }
    fn copy(&mut self, from: &str, to: &str) -> io::Result<()> {
        let content = self.files.get(from)
            .map(|data| data.borrow().clone())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))?;
        self.files.insert(to.to_owned(), Rc::new(RefCell::new(content)));
        Ok(())
    }
    fn rename(&mut self, from: &str, to: &str) -> io::Result<()> {
        let data = self.files.remove(from)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))?;
        self.files.insert(to.to_owned(), data);
        Ok(())
    }
    fn list_dir(&self) -> io::Result<(Vec<String>, Vec<String>)> {
        let mut files: Vec<String> = self.files.keys().cloned().collect();
        let mut dirs: Vec<String> = self.dirs.iter().cloned().collect();
        files.sort();
        dirs.sort();
        Ok((files, dirs))
    }
}

// Shared-handle forms of the doubles, so a test can keep inspecting them after
// handing ownership of the boxed trait object to a processor.

impl Console for Rc<RefCell<MemoryConsole>> {
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> { self.borrow_mut().write_bytes(bytes) }
    fn read_char(&mut self) -> io::Result<char> { self.borrow_mut().read_char() }
    fn clear(&mut self) -> io::Result<()> { self.borrow_mut().clear() }
    fn beep(&mut self) -> io::Result<()> { self.borrow_mut().beep() }
    fn set_cursor_x(&mut self, x: u64) -> io::Result<()> { self.borrow_mut().set_cursor_x(x) }
    fn set_cursor_y(&mut self, y: u64) -> io::Result<()> { self.borrow_mut().set_cursor_y(y) }
    fn cursor_x(&self) -> u64 { self.borrow().cursor_x() }
    fn cursor_y(&self) -> u64 { self.borrow().cursor_y() }
    fn size_x(&self) -> u64 { self.borrow().size_x() }
    fn size_y(&self) -> u64 { self.borrow().size_y() }
    fn set_foreground(&mut self, color: u64) -> io::Result<()> { self.borrow_mut().set_foreground(color) }
    fn set_background(&mut self, color: u64) -> io::Result<()> { self.borrow_mut().set_background(color) }
    fn reset_colors(&mut self) -> io::Result<()> { self.borrow_mut().reset_colors() }
}

impl FileSystem for Rc<RefCell<MemoryFileSystem>> {
    fn open(&mut self, path: &str) -> io::Result<Box<dyn FileHandle>> { self.borrow_mut().open(path) }
    fn delete(&mut self, path: &str) -> io::Result<()> { self.borrow_mut().delete(path) }
    fn exists(&self, path: &str) -> bool { self.borrow().exists(path) }
    fn size(&self, path: &str) -> io::Result<u64> { self.borrow().size(path) }
    fn set_working_dir(&mut self, path: &str) -> io::Result<()> { self.borrow_mut().set_working_dir(path) }
    fn working_dir(&self) -> String { self.borrow().working_dir() }
    fn create_dir(&mut self, path: &str) -> io::Result<()> { self.borrow_mut().create_dir(path) }
    fn delete_dir(&mut self, path: &str, recursive: bool) -> io::Result<()> { self.borrow_mut().delete_dir(path, recursive) }
    fn dir_exists(&self, path: &str) -> bool { self.borrow().dir_exists(path) }
    fn copy(&mut self, from: &str, to: &str) -> io::Result<()> { self.borrow_mut().copy(from, to) }
    fn rename(&mut self, from: &str, to: &str) -> io::Result<()> { self.borrow_mut().rename(from, to) }
    fn list_dir(&self) -> io::Result<(Vec<String>, Vec<String>)> { self.borrow().list_dir() }
}
