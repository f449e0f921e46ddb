//! Lecture des attributs dBase (.dbf)
//!
//! Les champs texte sont décodés avec l'encodage du `.cpg` (ou
//! Windows-1252 par défaut).

use encoding_rs::Encoding;
use serde_json::Value;

use crate::error::{LoaderError, Result};
use crate::types::Properties;

const DESCRIPTOR_LEN: usize = 32;
const TERMINATOR: u8 = 0x0D;

/// Descripteur de champ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub kind: u8,
    pub length: usize,
    pub decimals: u8,
    /// Position dans l'enregistrement (après l'octet de suppression)
    offset: usize,
}

/// Table dBase en mémoire
#[derive(Debug, Clone)]
pub struct DbfTable<'a> {
    data: &'a [u8],
    pub fields: Vec<Field>,
    pub record_count: usize,
    header_len: usize,
    record_len: usize,
    encoding: &'static Encoding,
}

impl<'a> DbfTable<'a> {
    /// Décode l'en-tête et les descripteurs de champs
    pub fn parse(data: &'a [u8], file: &str, encoding: &'static Encoding) -> Result<Self> {
        if data.len() < DESCRIPTOR_LEN + 1 {
            return Err(LoaderError::invalid_header(file, "dBase header too short"));
        }
        let record_count = u32::from_le_bytes([data[4], data[5], data[6], data[7]]) as usize;
        let header_len = u16::from_le_bytes([data[8], data[9]]) as usize;
        let record_len = u16::from_le_bytes([data[10], data[11]]) as usize;

        if header_len < DESCRIPTOR_LEN + 1 || header_len > data.len() || record_len == 0 {
            return Err(LoaderError::invalid_header(
                file,
                format!(
                    "inconsistent dBase header (header {}, record {}, size {})",
                    header_len,
                    record_len,
                    data.len()
                ),
            ));
        }

        let mut fields = Vec::new();
        let mut offset = 1;
        let mut pos = DESCRIPTOR_LEN;
        while pos + DESCRIPTOR_LEN <= header_len && data[pos] != TERMINATOR {
            let descriptor = &data[pos..pos + DESCRIPTOR_LEN];
            let name_end = memchr::memchr(0, &descriptor[..11]).unwrap_or(11);
            let (name, _, _) = encoding.decode(&descriptor[..name_end]);
            let length = descriptor[16] as usize;
            fields.push(Field {
                name: name.trim().to_string(),
                kind: descriptor[11].to_ascii_uppercase(),
                length,
                decimals: descriptor[17],
                offset,
            });
            offset += length;
            pos += DESCRIPTOR_LEN;
        }

        if offset > record_len {
            return Err(LoaderError::invalid_header(
                file,
                format!("field lengths ({}) exceed record length ({})", offset, record_len),
            ));
        }

        Ok(Self {
            data,
            fields,
            record_count,
            header_len,
            record_len,
            encoding,
        })
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    /// Nombre d'enregistrements réellement présents dans le buffer
    pub fn available_records(&self) -> usize {
        let body = self.data.len().saturating_sub(self.header_len);
        (body / self.record_len).min(self.record_count)
    }

    /// Attributs de l'enregistrement `index` (à partir de 0)
    pub fn row(&self, index: usize) -> Option<Properties> {
        if index >= self.available_records() {
            return None;
        }
        let start = self.header_len + index * self.record_len;
        let record = self.data.get(start..start + self.record_len)?;

        let mut properties = Properties::new();
        for field in &self.fields {
            let raw = record.get(field.offset..field.offset + field.length).unwrap_or(&[]);
            properties.insert(field.name.clone(), self.value(field, raw));
        }
        Some(properties)
    }

    fn value(&self, field: &Field, raw: &[u8]) -> Value {
        let (text, _, _) = self.encoding.decode(raw);
        let text = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');

        match field.kind {
            b'N' | b'F' => {
                if text.is_empty() || text.starts_with('*') {
                    return Value::Null;
                }
                if field.decimals == 0 {
                    if let Ok(int) = text.parse::<i64>() {
                        return int.into();
                    }
                }
                fast_float::parse::<f64, _>(text)
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            }
            b'L' => match text.chars().next() {
                Some('T' | 't' | 'Y' | 'y') => Value::Bool(true),
                Some('F' | 'f' | 'N' | 'n') => Value::Bool(false),
                _ => Value::Null,
            },
            b'D' if text.len() == 8 && text.bytes().all(|b| b.is_ascii_digit()) => {
                Value::String(format!("{}-{}-{}", &text[0..4], &text[4..6], &text[6..8]))
            }
            _ if text.is_empty() => Value::Null,
            _ => Value::String(text.to_string()),
        }
    }
}

/// Encodage déclaré par un `.cpg` (nom ou numéro de page de code)
pub fn encoding_from_cpg(content: &[u8]) -> Option<&'static Encoding> {
    let label = String::from_utf8_lossy(content);
    let label = label.trim();
    if label.is_empty() {
        return None;
    }
    let normalized = label.to_ascii_lowercase();
    let alias = match normalized.as_str() {
        "65001" | "utf8" => "utf-8",
        "1250" | "1251" | "1252" | "1253" | "1254" | "1255" | "1256" | "1257" | "1258" => {
            return Encoding::for_label(format!("windows-{}", normalized).as_bytes());
        }
        "88591" | "iso88591" | "latin1" => "iso-8859-1",
        "88592" => "iso-8859-2",
        "88595" => "iso-8859-5",
        "88597" => "iso-8859-7",
        "885915" => "iso-8859-15",
        "866" => "ibm866",
        "932" => "shift_jis",
        "936" => "gbk",
        "949" => "euc-kr",
        "950" => "big5",
        other => other,
    };
    Encoding::for_label(alias.as_bytes())
}
