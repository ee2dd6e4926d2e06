use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Define a Delimiter enum to handle both &str and `Vec<char>`
pub enum Delimiter {
    Str(String),
    Chars(Vec<char>),
}

impl From<&str> for Delimiter {
    fn from(s: &str) -> Self {
        Delimiter::Str(s.to_string())
    }
}

impl From<char> for Delimiter {
    fn from(c: char) -> Self {
        Delimiter::Chars(vec![c])
    }
}

impl From<Vec<char>> for Delimiter {
    fn from(chars: Vec<char>) -> Self {
        Delimiter::Chars(chars)
    }
}

impl From<&[char]> for Delimiter {
    fn from(chars: &[char]) -> Self {
        Delimiter::Chars(chars.to_vec())
    }
}

impl Delimiter {
    /// split a line into owned words
    pub fn split_line(&self, line: &str) -> Vec<Box<str>> {
        match self {
            Delimiter::Str(s) => line.split(s.as_str()).map(Box::from).collect(),
            Delimiter::Chars(chars) => line.split(chars.as_slice()).map(Box::from).collect(),
        }
    }
}

///
/// Read every line of the input_file into memory
///
/// * `input_file` - file name--either gzipped or not
///
pub fn read_lines(input_file: impl AsRef<Path>) -> anyhow::Result<Vec<Box<str>>> {
    let buf: Box<dyn BufRead> = open_buf_reader(input_file)?;
    let mut lines = vec![];
    for x in buf.lines() {
        lines.push(x?.into_boxed_str());
    }
    Ok(lines)
}

///
/// Read non-empty lines and split each of them into words
///
/// * `input_file` - file name--either gzipped or not
/// * `delim` - delimiter
///
pub fn read_lines_of_words_delim(
    input_file: impl AsRef<Path>,
    delim: impl Into<Delimiter>,
) -> anyhow::Result<Vec<Vec<Box<str>>>> {
    let delim = delim.into();
    Ok(read_lines(input_file)?
        .iter()
        .filter(|line| !line.trim().is_empty())
        .map(|line| delim.split_line(line.trim_end_matches('\r')))
        .collect())
}

///
/// Write every line into the output_file
///
/// * `lines` - vector of lines
/// * `output_file` - file name--either gzipped or not
///
pub fn write_lines<T>(lines: &[T], output_file: impl AsRef<Path>) -> anyhow::Result<()>
where
    T: std::fmt::Display,
{
    let mut buf = open_buf_writer(output_file)?;
    for line in lines {
        if let Err(e) = writeln!(buf, "{}", line) {
            if e.kind() == std::io::ErrorKind::BrokenPipe {
                return Ok(());
            } else {
                return Err(anyhow::anyhow!("unexpected error: {}", e));
            }
        }
    }
    buf.flush()?;
    Ok(())
}

fn is_gzipped(path: &Path) -> bool {
    matches!(path.extension().and_then(|x| x.to_str()), Some("gz"))
}

///
/// Open a file for reading, and return a buffered reader
/// * `input_file` - file name--either gzipped or not
pub fn open_buf_reader(input_file: impl AsRef<Path>) -> anyhow::Result<Box<dyn BufRead>> {
    let path = input_file.as_ref();
    let file = File::open(path)
        .map_err(|e| anyhow::anyhow!("failed to open {}: {}", path.display(), e))?;

    if is_gzipped(path) {
        Ok(Box::new(BufReader::new(GzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

///
/// Open a file for writing, and return a buffered writer
/// * `output_file` - file name--either gzipped or not
pub fn open_buf_writer(output_file: impl AsRef<Path>) -> anyhow::Result<Box<dyn Write>> {
    let path = output_file.as_ref();

    // we can simply override with stdout
    if let Some(name) = path.to_str() {
        if name.eq_ignore_ascii_case("stdout") {
            return Ok(Box::new(BufWriter::new(std::io::stdout())));
        }
        if name.eq_ignore_ascii_case("stderr") {
            return Ok(Box::new(BufWriter::new(std::io::stderr())));
        }
    }

    mkdir(path)?;
    let file = File::create(path)?;

    if is_gzipped(path) {
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        Ok(Box::new(BufWriter::new(encoder)))
    } else {
        Ok(Box::new(BufWriter::new(file)))
    }
}

///
/// Create the parent directory of a file if needed
/// * `file` - file name
///
pub fn mkdir(file: impl AsRef<Path>) -> anyhow::Result<()> {
    if let Some(dir) = file.as_ref().parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }
    Ok(())
}

///
/// Take the basename of a file or a directory
/// * `file` - file name
///
pub fn basename(file: impl AsRef<Path>) -> anyhow::Result<Box<str>> {
    let path = file.as_ref();
    path.file_name()
        .and_then(|x| x.to_str())
        .map(Box::from)
        .ok_or_else(|| anyhow::anyhow!("no base name: {}", path.display()))
}

///
/// Find the first existing file among `candidates` within `dir`
/// * `dir` - directory to search
/// * `candidates` - file names in the order of preference
///
pub fn find_first_file(dir: impl AsRef<Path>, candidates: &[&str]) -> Option<std::path::PathBuf> {
    candidates
        .iter()
        .map(|name| dir.as_ref().join(name))
        .find(|path| path.is_file())
}
