//! Découpage d'un DXF ASCII en paires (code de groupe, valeur)
//!
//! Les fins de ligne `\r\n`, `\n` et `\r` sont acceptées indifféremment, et
//! les lignes vides parasites à la place d'un code de groupe sont ignorées.
//! Les valeurs textuelles (codes 1, 3 et 1000) gardent leurs espaces.

use memchr::memchr2;

use crate::error::{LoaderError, Result};

/// Sentinelle d'un DXF binaire
const BINARY_SENTINEL: &[u8] = b"AutoCAD Binary DXF";

/// Codes dont la valeur est un texte libre
fn is_text_code(code: i32) -> bool {
    matches!(code, 1 | 3 | 1000)
}

/// Paire code de groupe / valeur
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pair<'a> {
    pub code: i32,
    pub value: &'a str,
}

impl<'a> Pair<'a> {
    /// Valeur numérique (NaN si illisible)
    pub fn float(&self) -> f64 {
        fast_float::parse::<f64, _>(self.value.trim()).unwrap_or(f64::NAN)
    }

    pub fn int(&self) -> Option<i64> {
        self.value.trim().parse().ok()
    }

    /// Indique un marqueur de code 0 (`SECTION`, `ENDSEC`, type d'entité...)
    pub fn is(&self, code: i32, value: &str) -> bool {
        self.code == code && self.value.eq_ignore_ascii_case(value)
    }
}

/// Itérateur de lignes, tolérant à tous les séparateurs
struct Lines<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Iterator for Lines<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let bytes = self.text.as_bytes();
        if self.pos >= bytes.len() {
            return None;
        }
        let rest = &bytes[self.pos..];
        match memchr2(b'\n', b'\r', rest) {
            Some(i) => {
                let line = &self.text[self.pos..self.pos + i];
                let mut next = self.pos + i + 1;
                if rest[i] == b'\r' && rest.get(i + 1) == Some(&b'\n') {
                    next += 1;
                }
                self.pos = next;
                Some(line)
            }
            None => {
                let line = &self.text[self.pos..];
                self.pos = bytes.len();
                Some(line)
            }
        }
    }
}

/// Découpe le texte en paires jusqu'au marqueur `EOF`
pub fn tokenize<'a>(text: &'a str, file: &str) -> Result<Vec<Pair<'a>>> {
    if text.as_bytes().starts_with(BINARY_SENTINEL) {
        return Err(LoaderError::parse_error(file, "binary DXF is not supported"));
    }

    let mut pairs = Vec::new();
    let mut lines = Lines { text, pos: 0 }.enumerate();

    while let Some((number, line)) = lines.next() {
        let code_text = line.trim();
        if code_text.is_empty() {
            continue;
        }
        let code: i32 = code_text.parse().map_err(|_| {
            LoaderError::parse_error(
                file,
                format!("invalid group code {:?} at line {}", code_text, number + 1),
            )
        })?;
        let Some((_, value)) = lines.next() else {
            // Code final sans valeur : fichier tronqué, on garde ce qui précède
            break;
        };
        let value = if is_text_code(code) { value } else { value.trim() };
        let pair = Pair { code, value };
        if pair.is(0, "EOF") {
            break;
        }
        pairs.push(pair);
    }

    if !pairs.iter().any(|p| p.is(0, "SECTION")) {
        return Err(LoaderError::parse_error(file, "no SECTION found, not a DXF drawing"));
    }
    Ok(pairs)
}

/// Découpe une suite de paires en enregistrements commençant par un code 0
pub fn records<'p, 'a>(pairs: &'p [Pair<'a>]) -> impl Iterator<Item = &'p [Pair<'a>]> {
    let mut start = 0;
    std::iter::from_fn(move || {
        if start >= pairs.len() {
            return None;
        }
        let end = pairs[start + 1..]
            .iter()
            .position(|p| p.code == 0)
            .map_or(pairs.len(), |i| start + 1 + i);
        let record = &pairs[start..end];
        start = end;
        Some(record)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixed_line_endings_and_blank_lines() {
        let text = "  0\r\nSECTION\n  2\rENTITIES\r\n\r\n  0\nPOINT\n 10\n1.5\n 20\n-2\n  0\nEOF\n";
        let pairs = tokenize(text, "a.dxf").unwrap();
        assert_eq!(pairs.len(), 5);
        assert_eq!(pairs[1], Pair { code: 2, value: "ENTITIES" });
        assert_eq!(pairs[3].float(), 1.5);
        assert_eq!(pairs[4].float(), -2.0);
    }

    #[test]
    fn test_text_values_keep_spaces() {
        let text = "0\nSECTION\n0\nMTEXT\n3\nHello \n1\n  world\n8\n  roads  \n0\nEOF\n";
        let pairs = tokenize(text, "a.dxf").unwrap();
        assert_eq!(pairs[2].value, "Hello ");
        assert_eq!(pairs[3].value, "  world");
        assert_eq!(pairs[4].value, "roads");
    }

    #[test]
    fn test_invalid_code() {
        let err = tokenize("0\nSECTION\nabc\nX\n", "a.dxf").unwrap_err();
        assert!(err.to_string().contains("line 3"));
    }

    #[test]
    fn test_not_a_drawing() {
        assert!(tokenize("999\ncomment\n", "a.dxf").is_err());
        assert!(tokenize("AutoCAD Binary DXF\r\n\x1a\0", "a.dxf").is_err());
    }

    #[test]
    fn test_records() {
        let pairs = tokenize("0\nSECTION\n2\nENTITIES\n0\nLINE\n8\nroads\n0\nENDSEC\n", "a.dxf").unwrap();
        let kinds: Vec<&str> = records(&pairs).map(|r| r[0].value).collect();
        assert_eq!(kinds, vec!["SECTION", "LINE", "ENDSEC"]);
        assert_eq!(records(&pairs).nth(1).map(|r| r.len()), Some(2));
    }
}
