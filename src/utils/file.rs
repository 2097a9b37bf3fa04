use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use lazy_static::lazy_static;
use regex::Regex;

use crate::config::defs::{FASTA_EXTS, FASTQ_EXTS, GZIP_EXT};

lazy_static! {
    static ref SAFE_NAME: Regex = Regex::new(r"^[A-Za-z0-9._-]+$").unwrap();
}

pub fn is_gzipped(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let mut buffer = [0u8; 2];
    match file.read_exact(&mut buffer) {
        Ok(()) => Ok(buffer == [0x1F, 0x8B]), // Gzip magic bytes
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Plain or gzip-decoding reader over a file.
pub enum FileReader {
    Uncompressed(BufReader<File>),
    Gzipped(MultiGzDecoder<BufReader<File>>),
}

impl Read for FileReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            FileReader::Uncompressed(r) => r.read(buf),
            FileReader::Gzipped(r) => r.read(buf),
        }
    }
}

pub fn open_maybe_gzipped(path: &Path) -> io::Result<FileReader> {
    let gz = is_gzipped(path)?;
    let reader = BufReader::new(File::open(path)?);
    Ok(if gz {
        FileReader::Gzipped(MultiGzDecoder::new(reader))
    } else {
        FileReader::Uncompressed(reader)
    })
}


/// Strips all extensions from a path.
///
/// # Arguments
///
/// * `path` - Any path.
///
/// # Returns
/// Tuple of the path without extensions and the removed extensions, outermost last.
pub fn extension_remover(path: &Path) -> (PathBuf, Vec<String>) {
    let mut stem = path.to_path_buf();
    let mut extensions = Vec::new();
    while let Some(ext) = stem.extension().map(|e| e.to_string_lossy().into_owned()) {
        let known = ext.eq_ignore_ascii_case(GZIP_EXT)
            || FASTA_EXTS.iter().any(|e| e.eq_ignore_ascii_case(&ext))
            || FASTQ_EXTS.iter().any(|e| e.eq_ignore_ascii_case(&ext));
        if !known {
            break;
        }
        extensions.push(ext);
        stem.set_extension("");
    }
    extensions.reverse();
    (stem, extensions)
}

/// True for FASTA/FASTQ files, gzipped or not, judged by extension.
pub fn is_sequence_file(path: &Path) -> bool {
    let (_, extensions) = extension_remover(path);
    extensions
        .iter()
        .any(|ext| FASTA_EXTS.iter().chain(FASTQ_EXTS.iter()).any(|e| e.eq_ignore_ascii_case(ext)))
}

/// File name with sequence and gzip extensions removed.
pub fn sample_name_from_path(path: &Path) -> Option<String> {
    let (stem, _) = extension_remover(path);
    stem.file_name().map(|n| n.to_string_lossy().into_owned())
}

/// Whether `name` can stand as one path component inside the output directory.
pub fn is_safe_sample_name(name: &str) -> bool {
    name != "." && name != ".." && SAFE_NAME.is_match(name)
}


/// Builds a path from a base name, optional directory, prefix and suffix.
///
/// # Arguments
///
/// * `base` - Base file name or path; only the file name is kept when `dir` is given.
/// * `dir` - Optional parent directory.
/// * `prefix` - Optional text placed before the base name.
/// * `suffix` - Optional text placed after the base name.
/// * `delimiter` - Joins prefix, base and suffix.
///
/// # Returns
/// The assembled PathBuf.
pub fn file_path_manipulator(
    base: &Path,
    dir: Option<&Path>,
    prefix: Option<&str>,
    suffix: Option<&str>,
    delimiter: &str,
) -> PathBuf {
    let name = base
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut file_name = String::new();
    if let Some(prefix) = prefix {
        file_name.push_str(prefix);
        file_name.push_str(delimiter);
    }
    file_name.push_str(&name);
    if let Some(suffix) = suffix {
        file_name.push_str(delimiter);
        file_name.push_str(suffix);
    }

    match dir {
        Some(dir) => dir.join(file_name),
        None => match base.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.join(file_name),
            _ => PathBuf::from(file_name),
        },
    }
}


/// Sorted entries of a directory. Sorting pins the processing order across runs.
pub fn sorted_dir_entries(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<io::Result<Vec<_>>>()?;
    entries.sort();
    Ok(entries)
}


/// Concatenates files byte-for-byte into `out`, decompressing gzipped parts.
/// Records are never re-parsed.
///
/// # Arguments
///
/// * `parts` - Input files, written in the given order.
/// * `out` - Destination, truncated first.
///
/// # Returns
/// Number of bytes written.
pub fn concatenate_files(parts: &[PathBuf], out: &Path) -> io::Result<u64> {
    let mut writer = BufWriter::new(File::create(out)?);
    let mut total = 0u64;
    for part in parts {
        let mut reader = open_maybe_gzipped(part)?;
        total += io::copy(&mut reader, &mut writer)?;
    }
    writer.flush()?;
    Ok(total)
}

/// Writes `header` as the first line of `path`, keeping the existing body.
pub fn prepend_line(path: &Path, header: &str) -> io::Result<()> {
    let tmp_path = file_path_manipulator(path, None, None, Some("tmp"), ".");
    {
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        writeln!(writer, "{}", header)?;
        let mut reader = BufReader::new(File::open(path)?);
        io::copy(&mut reader, &mut writer)?;
        writer.flush()?;
    }
    fs::rename(&tmp_path, path)
}
