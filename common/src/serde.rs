use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::file_format::SerdeFormat;

pub type Result<T> = anyhow::Result<T>;

pub fn serialize<T: Serialize>(value: &T, format: SerdeFormat) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    serialize_into(value, format, &mut buffer)?;
    Ok(buffer)
}

pub fn serialize_into<T: Serialize, W: Write>(
    value: &T,
    format: SerdeFormat,
    writer: &mut W,
) -> Result<()> {
    match format {
        SerdeFormat::Yaml => {
            let s = serde_yml::to_string(value)?;
            writer.write_all(s.as_bytes())?;
            if !s.ends_with('\n') {
                writer.write_all(b"\n")?;
            }
        }
        SerdeFormat::Json => {
            let s = serde_json::to_string_pretty(value)?;
            writer.write_all(s.as_bytes())?;
            writer.write_all(b"\n")?;
        }
        SerdeFormat::Bin => {
            let encoded = bincode::serde::encode_to_vec(value, bincode::config::standard())?;
            // uncompressed size is prepended as 4 little-endian bytes
            let compressed = lz4_flex::compress_prepend_size(&encoded);
            writer.write_all(&compressed)?;
        }
    }

    Ok(())
}

pub fn deserialize<T: DeserializeOwned>(serialized: &[u8], format: SerdeFormat) -> Result<T> {
    match format {
        SerdeFormat::Yaml => {
            let text = std::str::from_utf8(serialized)?;
            Ok(serde_yml::from_str(text)?)
        }
        SerdeFormat::Json => {
            let text = std::str::from_utf8(serialized)?;
            Ok(serde_json::from_str(text)?)
        }
        SerdeFormat::Bin => {
            let decompressed = lz4_flex::decompress_size_prepended(serialized)?;
            let (decoded, read) =
                bincode::serde::decode_from_slice(&decompressed, bincode::config::standard())?;
            if read != decompressed.len() {
                anyhow::bail!("binary payload should be fully consumed");
            }
            Ok(decoded)
        }
    }
}

/// Serializes `value` to `path`, picking the format from the file extension.
pub fn save_to_file<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let format = SerdeFormat::from_path(path)?;
    crate::file_utils::ensure_parent_dir(path)?;
    let bytes = serialize(value, format)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

pub fn load_from_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let format = SerdeFormat::from_path(path)?;
    let bytes = std::fs::read(path)?;
    deserialize(&bytes, format)
}
