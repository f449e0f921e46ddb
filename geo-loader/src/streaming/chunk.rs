//! Découpage des sources en chunks
//!
//! Les formats texte sont découpés en blocs d'environ
//! `DEFAULT_TEXT_CHUNK_SIZE` octets, coupés sur le dernier saut de ligne pour
//! qu'aucun enregistrement ne soit à cheval sur deux chunks. Les formats
//! binaires sont lus d'un seul tenant, dans la limite de `MAX_BINARY_READ`.

use std::borrow::Cow;

use bytes::Bytes;

use crate::companion::FileRef;
use crate::error::{LoaderError, Result};

/// Taille cible d'un chunk texte (64 Kio)
pub const DEFAULT_TEXT_CHUNK_SIZE: usize = 64 * 1024;

/// Lecture binaire contiguë maximale (512 Mio)
pub const MAX_BINARY_READ: usize = 512 * 1024 * 1024;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Lecture binaire d'un seul tenant
pub fn read_binary(file: &FileRef) -> Result<Bytes> {
    if file.len() > MAX_BINARY_READ {
        return Err(LoaderError::FileTooLarge {
            name: file.name.clone(),
            size: file.len(),
            max: MAX_BINARY_READ,
        });
    }
    Ok(file.data.clone())
}

/// Décode du texte UTF-8 (validation SIMD), avec repli Windows-1252
pub fn decode_text(data: &[u8]) -> Cow<'_, str> {
    let data = data.strip_prefix(UTF8_BOM).unwrap_or(data);
    match simdutf8::basic::from_utf8(data) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => encoding_rs::WINDOWS_1252.decode(data).0,
    }
}

/// Itérateur de chunks texte alignés sur les fins de ligne
///
/// Les chunks partagent le buffer source (`Bytes::slice`), sans copie.
#[derive(Debug, Clone)]
pub struct ChunkReader {
    data: Bytes,
    chunk_size: usize,
    offset: usize,
}

impl ChunkReader {
    pub fn new(data: Bytes, chunk_size: usize) -> Self {
        let data = if data.starts_with(UTF8_BOM) {
            data.slice(UTF8_BOM.len()..)
        } else {
            data
        };
        Self {
            data,
            chunk_size: chunk_size.max(1),
            offset: 0,
        }
    }

    /// Reprend la lecture à une position donnée (ex : après l'en-tête)
    pub fn starting_at(mut self, offset: usize) -> Self {
        self.offset = offset.min(self.data.len());
        self
    }

    /// Octets déjà consommés
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn total_len(&self) -> usize {
        self.data.len()
    }

    /// Fraction lue, dans [0, 1]
    pub fn progress(&self) -> f64 {
        if self.data.is_empty() {
            1.0
        } else {
            self.offset as f64 / self.data.len() as f64
        }
    }

    /// Taille du prochain chunk (borne haute pour l'admission mémoire)
    pub fn next_len(&self) -> usize {
        self.chunk_end().saturating_sub(self.offset)
    }

    fn chunk_end(&self) -> usize {
        let len = self.data.len();
        let tentative = self.offset.saturating_add(self.chunk_size).min(len);
        if tentative == len {
            return len;
        }
        let window = &self.data[self.offset..tentative];
        match memchr::memrchr(b'\n', window) {
            Some(pos) => self.offset + pos + 1,
            // Ligne plus longue qu'un chunk : on va jusqu'à sa fin
            None => match memchr::memchr(b'\n', &self.data[tentative..]) {
                Some(pos) => tentative + pos + 1,
                None => len,
            },
        }
    }

    /// Première ligne (sans fin de ligne) et position de la suivante
    pub fn first_line(&self) -> Option<(Bytes, usize)> {
        if self.data.is_empty() {
            return None;
        }
        let end = memchr::memchr(b'\n', &self.data).unwrap_or(self.data.len());
        let mut line_end = end;
        if line_end > 0 && self.data[line_end - 1] == b'\r' {
            line_end -= 1;
        }
        Some((self.data.slice(..line_end), (end + 1).min(self.data.len())))
    }
}

impl Iterator for ChunkReader {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        if self.offset >= self.data.len() {
            return None;
        }
        let end = self.chunk_end();
        let chunk = self.data.slice(self.offset..end);
        self.offset = end;
        Some(chunk)
    }
}

/// Itère sur les lignes physiques d'un chunk (`\n`, `\r\n` ou `\r`)
///
/// Les lignes vides sont conservées pour que la numérotation suive le
/// fichier ; la fin de ligne finale ne produit pas de ligne vide.
pub fn lines(text: &str) -> impl Iterator<Item = &str> {
    let mut rest = text;
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        match rest.find(['\n', '\r']) {
            Some(i) => {
                let line = &rest[..i];
                let terminator = if rest[i..].starts_with("\r\n") { 2 } else { 1 };
                rest = &rest[i + terminator..];
                Some(line)
            }
            None => Some(std::mem::take(&mut rest)),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunks_end_on_newline() {
        let data = Bytes::from_static(b"a,b\n1,2\n3,4\n5,6\n");
        let chunks: Vec<Bytes> = ChunkReader::new(data, 6).collect();
        assert_eq!(chunks.len(), 4);
        assert!(chunks.iter().all(|c| c.ends_with(b"\n")));
        let joined: Vec<u8> = chunks.concat();
        assert_eq!(joined, b"a,b\n1,2\n3,4\n5,6\n");
    }

    #[test]
    fn test_long_line_is_not_split() {
        let data = Bytes::from_static(b"0123456789\nab\n");
        let mut reader = ChunkReader::new(data, 4);
        assert_eq!(reader.next().unwrap(), Bytes::from_static(b"0123456789\n"));
        assert_eq!(reader.next().unwrap(), Bytes::from_static(b"ab\n"));
        assert!(reader.next().is_none());
        assert_eq!(reader.progress(), 1.0);
    }

    #[test]
    fn test_first_line_and_bom() {
        let data = Bytes::from_static(b"\xEF\xBB\xBFx;y\r\n1;2");
        let reader = ChunkReader::new(data, 1024);
        let (header, next) = reader.first_line().unwrap();
        assert_eq!(header, Bytes::from_static(b"x;y"));
        let rest: Vec<Bytes> = reader.starting_at(next).collect();
        assert_eq!(rest, vec![Bytes::from_static(b"1;2")]);
    }

    #[test]
    fn test_decode_latin1_fallback() {
        assert_eq!(decode_text(b"Z\xfcrich"), "Zürich");
        assert_eq!(decode_text("Genève".as_bytes()), "Genève");
    }

    #[test]
    fn test_binary_limit() {
        let file = FileRef::new("a.shp", Bytes::from_static(b"abc"));
        assert_eq!(read_binary(&file).unwrap().len(), 3);
    }

    #[test]
    fn test_lines_handles_all_endings() {
        let collected: Vec<&str> = lines("a\r\nb\rc\n\nd\n").collect();
        assert_eq!(collected, vec!["a", "b", "c", "", "d"]);
    }
}
