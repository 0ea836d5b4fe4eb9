//! Cell value conversion / 单元格值转换
//!
//! Raw observed values are stored as text. Before indexing they are checked
//! against the feature's data type and rendered canonically; cross references
//! (xref) are resolved to the referenced characteristic's name.

use std::collections::HashMap;

use sqlx::SqliteConnection;

use crate::models::Characteristic;

#[derive(Debug, thiserror::Error)]
pub enum ValueConverterError {
    #[error("unknown characteristic identifier [{0}]")]
    UnknownCharacteristic(String),
    #[error("malformed {data_type} value [{value}]")]
    Malformed { data_type: &'static str, value: String },
    #[error("characteristic lookup failed: {0}")]
    Database(#[from] sqlx::Error),
}

/// Feature data types / 特征数据类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    String,
    Text,
    Int,
    Decimal,
    Bool,
    Xref,
}

impl From<&str> for DataType {
    fn from(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "text" => DataType::Text,
            "int" | "integer" => DataType::Int,
            "decimal" | "double" => DataType::Decimal,
            "bool" | "boolean" => DataType::Bool,
            "xref" => DataType::Xref,
            // Unknown types are indexed as plain strings / 未知类型按字符串处理
            _ => DataType::String,
        }
    }
}

/// Convert a non-xref cell / 转换非引用类型的单元格
pub fn convert_scalar(data_type: DataType, raw: Option<&str>) -> Result<Option<String>, ValueConverterError> {
    let Some(raw) = raw else { return Ok(None) };
    let trimmed = raw.trim();

    let converted = match data_type {
        DataType::String | DataType::Text | DataType::Xref => raw.to_string(),
        DataType::Int => trimmed
            .parse::<i64>()
            .map_err(|_| malformed("int", raw))?
            .to_string(),
        DataType::Decimal => {
            let value = trimmed.parse::<f64>().map_err(|_| malformed("decimal", raw))?;
            if !value.is_finite() {
                return Err(malformed("decimal", raw));
            }
            value.to_string()
        }
        DataType::Bool => match trimmed.to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => "true".to_string(),
            "false" | "no" | "0" => "false".to_string(),
            _ => return Err(malformed("bool", raw)),
        },
    };
    Ok(Some(converted))
}

fn malformed(data_type: &'static str, raw: &str) -> ValueConverterError {
    ValueConverterError::Malformed {
        data_type,
        value: raw.to_string(),
    }
}

/// Characteristic lookup cache, scoped to one session / 特征值缓存（会话级）
///
/// Misses are cached as well, an unknown identifier costs one query.
#[derive(Debug, Default)]
pub struct CharacteristicCache {
    by_identifier: HashMap<String, Option<Characteristic>>,
}

impl CharacteristicCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn find(
        &mut self,
        conn: &mut SqliteConnection,
        identifier: &str,
    ) -> Result<Option<Characteristic>, sqlx::Error> {
        if let Some(cached) = self.by_identifier.get(identifier) {
            return Ok(cached.clone());
        }

        let found: Option<Characteristic> = sqlx::query_as(
            "SELECT id, identifier, name FROM characteristics WHERE identifier = ?"
        )
        .bind(identifier)
        .fetch_optional(&mut *conn)
        .await?;

        self.by_identifier.insert(identifier.to_string(), found.clone());
        Ok(found)
    }

    pub fn len(&self) -> usize {
        self.by_identifier.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_identifier.is_empty()
    }
}

/// Convert one cell, resolving xrefs through the cache / 转换单元格（解析引用）
pub async fn convert_cell(
    cache: &mut CharacteristicCache,
    conn: &mut SqliteConnection,
    data_type: DataType,
    raw: Option<&str>,
) -> Result<Option<String>, ValueConverterError> {
    if data_type != DataType::Xref {
        return convert_scalar(data_type, raw);
    }

    let Some(identifier) = raw else { return Ok(None) };
    match cache.find(conn, identifier).await? {
        Some(characteristic) => Ok(Some(characteristic.name)),
        None => Err(ValueConverterError::UnknownCharacteristic(identifier.to_string())),
    }
}
