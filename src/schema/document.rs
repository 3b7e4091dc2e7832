// schema/document.rs - 文档转换
//! 将任意 JSON 文档按编译后的 Schema 转换为强类型字段值

use serde_json::{Map, Value};
use tantivy::TantivyDocument;
use tantivy::schema::Field;

use super::{CompiledSchema, FieldKind};

/// 文档转换错误
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("Malformed document JSON: {0}")]
    Malformed(String),

    #[error("Document must be a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("Type mismatch on field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        got: &'static str,
    },

    #[error("Unknown field: {0}")]
    UnknownField(String),
}

/// 强类型字段值
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    I64(i64),
    F64(f64),
}

impl FieldValue {
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Text(s) => Value::String(s.clone()),
            FieldValue::I64(n) => Value::from(*n),
            FieldValue::F64(n) => Value::from(*n),
        }
    }
}

/// 转换后的文档，字段按 Schema 声明顺序排列
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypedDocument {
    pub values: Vec<(Field, FieldValue)>,
    /// 被忽略的未知键
    pub ignored: Vec<String>,
}

impl TypedDocument {
    /// 解析 JSON 文本并转换
    ///
    /// `strict` 为 true 时未知键导致失败，否则忽略并记录在 `ignored` 中。
    pub fn translate(
        schema: &CompiledSchema,
        raw: &str,
        strict: bool,
    ) -> Result<Self, DocumentError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| DocumentError::Malformed(e.to_string()))?;
        match value {
            Value::Object(map) => Self::from_map(schema, &map, strict),
            other => Err(DocumentError::NotAnObject(json_kind(&other))),
        }
    }

    pub fn from_map(
        schema: &CompiledSchema,
        map: &Map<String, Value>,
        strict: bool,
    ) -> Result<Self, DocumentError> {
        let mut ignored = Vec::new();
        for key in map.keys() {
            if schema.field(key).is_none() {
                if strict {
                    return Err(DocumentError::UnknownField(key.clone()));
                }
                ignored.push(key.clone());
            }
        }

        let mut values = Vec::with_capacity(map.len() - ignored.len());
        for compiled in schema.fields() {
            let Some(raw) = map.get(&compiled.def.name) else {
                continue;
            };
            if let Some(value) = coerce(&compiled.def.name, compiled.def.kind, raw)? {
                values.push((compiled.field, value));
            }
        }

        Ok(Self { values, ignored })
    }

    pub fn get(&self, field: Field) -> Option<&FieldValue> {
        self.values.iter().find(|(f, _)| *f == field).map(|(_, v)| v)
    }

    /// 生成写入引擎用的文档
    pub fn to_tantivy(&self) -> TantivyDocument {
        let mut doc = TantivyDocument::new();
        for (field, value) in &self.values {
            match value {
                FieldValue::Text(s) => doc.add_text(*field, s),
                FieldValue::I64(n) => doc.add_i64(*field, *n),
                FieldValue::F64(n) => doc.add_f64(*field, *n),
            }
        }
        doc
    }
}

/// 按字段类型转换单个值；null 视为缺省
fn coerce(name: &str, kind: FieldKind, raw: &Value) -> Result<Option<FieldValue>, DocumentError> {
    let mismatch = || DocumentError::TypeMismatch {
        field: name.to_string(),
        expected: kind.as_str(),
        got: json_kind(raw),
    };

    let value = match (kind, raw) {
        (_, Value::Null) => return Ok(None),
        (FieldKind::Text, Value::String(s)) => FieldValue::Text(s.clone()),
        (FieldKind::I64, Value::Number(n)) => FieldValue::I64(n.as_i64().ok_or_else(mismatch)?),
        (FieldKind::F64, Value::Number(n)) => FieldValue::F64(n.as_f64().ok_or_else(mismatch)?),
        _ => return Err(mismatch()),
    };
    Ok(Some(value))
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_i64() => "integer",
        Value::Number(n) if n.is_u64() => "unsigned integer",
        Value::Number(_) => "float",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
