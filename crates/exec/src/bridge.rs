//! Bridge between request rows and client message buffers
//!
//! Output items are evaluated against the current row and written into the
//! caller's message, one column per item. Records keep the format version
//! they were stored with; fields added by later DDL are resolved through
//! the relation's format history.

use crate::error::{Error, Result};
use crate::request::Row;
use keel_message::Format;
use keel_value::{DataType, Value};
use std::fmt;
use std::sync::Arc;

/// Rendering of NULL in validation errors
pub const NULL_STRING_MARK: &str = "*** null ***";

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub default: Option<Value>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            default: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// One version of a relation's record layout
#[derive(Debug, Clone, PartialEq)]
pub struct RecordFormat {
    pub version: u16,
    pub fields: Vec<FieldDef>,
}

/// Every format a relation has had, oldest first. Version numbers are
/// indexes into the list.
#[derive(Debug, Clone, PartialEq)]
pub struct FormatHistory {
    formats: Vec<Arc<RecordFormat>>,
}

impl FormatHistory {
    pub fn new(fields: Vec<FieldDef>) -> Self {
        Self {
            formats: vec![Arc::new(RecordFormat { version: 0, fields })],
        }
    }

    pub fn current(&self) -> &Arc<RecordFormat> {
        // Never empty: constructed with an initial format
        &self.formats[self.formats.len() - 1]
    }

    pub fn get(&self, version: u16) -> Option<&Arc<RecordFormat>> {
        self.formats.get(version as usize)
    }

    /// A history extended by a new format
    pub fn with_format(&self, fields: Vec<FieldDef>) -> Self {
        let mut formats = self.formats.clone();
        let version = formats.len() as u16;
        formats.push(Arc::new(RecordFormat { version, fields }));
        Self { formats }
    }

    /// Default of field `id` from the first format, starting at `version`,
    /// that declares one
    pub fn default_for(&self, version: u16, id: usize) -> Option<&Value> {
        self.formats
            .iter()
            .skip(version as usize)
            .find_map(|format| format.fields.get(id).and_then(|f| f.default.as_ref()))
    }
}

/// Result of looking a field up in a record
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Stored in the record (possibly NULL)
    Present(Value),
    /// Not stored; taken from a newer format's default
    Defaulted(Value),
    /// Not stored and no format supplies a default
    NotPresent,
}

impl FieldValue {
    /// The value a descriptor would carry; missing fields read as a single
    /// space
    pub fn value(&self) -> Value {
        match self {
            FieldValue::Present(v) | FieldValue::Defaulted(v) => v.clone(),
            FieldValue::NotPresent => Value::Str(" ".to_string()),
        }
    }

    /// Value as seen by expressions: missing fields are NULL
    pub fn into_sql(self) -> Value {
        match self {
            FieldValue::Present(v) | FieldValue::Defaulted(v) => v,
            FieldValue::NotPresent => Value::Null,
        }
    }
}

/// A stored row of a relation
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub history: Arc<FormatHistory>,
    pub version: u16,
    pub values: Vec<Value>,
}

impl Record {
    pub fn field_value(&self, id: usize) -> FieldValue {
        let stored = self
            .history
            .get(self.version)
            .map_or(0, |format| format.fields.len());

        if id < stored
            && let Some(value) = self.values.get(id)
        {
            return FieldValue::Present(value.clone());
        }

        match self.history.default_for(self.version, id) {
            Some(default) => FieldValue::Defaulted(default.clone()),
            None => FieldValue::NotPresent,
        }
    }

    /// All fields of the current format, defaults applied
    pub fn upgraded_values(&self) -> Vec<Value> {
        let width = self.history.current().fields.len();
        (0..width).map(|id| self.field_value(id).into_sql()).collect()
    }
}

/// Expression evaluator collaborator
pub trait Evaluate: Send + Sync + fmt::Debug {
    fn evaluate(&self, row: &Row, params: &[Value]) -> Result<Value>;
}

/// Output and assignment expressions the bridge evaluates itself
#[derive(Debug, Clone)]
pub enum Expression {
    /// Field `id` of the record in `stream`
    Field { stream: usize, id: usize },
    /// Input parameter by position
    Parameter(usize),
    Literal(Value),
    /// Anything else, evaluated by the caller-supplied evaluator
    Custom(Arc<dyn Evaluate>),
}

impl Evaluate for Expression {
    fn evaluate(&self, row: &Row, params: &[Value]) -> Result<Value> {
        match self {
            Expression::Field { stream, id } => Ok(row
                .records
                .get(*stream)
                .and_then(|r| r.as_ref())
                .map_or(Value::Null, |record| record.field_value(*id).into_sql())),
            Expression::Parameter(index) => params
                .get(*index)
                .cloned()
                .ok_or_else(|| Error::Execution(format!("parameter {} is not bound", index))),
            Expression::Literal(value) => Ok(value.clone()),
            Expression::Custom(evaluator) => evaluator.evaluate(row, params),
        }
    }
}

pub type Check = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Validation rules attached to an item
#[derive(Clone)]
pub struct ItemInfo {
    pub name: String,
    pub nullable: bool,
    pub check: Option<Check>,
}

impl ItemInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nullable: true,
            check: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_check(mut self, check: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        self.check = Some(Arc::new(check));
        self
    }
}

impl fmt::Debug for ItemInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemInfo")
            .field("name", &self.name)
            .field("nullable", &self.nullable)
            .field("check", &self.check.is_some())
            .finish()
    }
}

/// Fail if `value` breaks the not-null or check rule of `info`. A check
/// is not applied to NULL.
pub fn validate(info: &ItemInfo, value: &Value) -> Result<()> {
    if value.is_null() {
        if !info.nullable {
            return Err(Error::Validation {
                item: info.name.clone(),
                value: NULL_STRING_MARK.to_string(),
            });
        }
        return Ok(());
    }

    if let Some(check) = &info.check
        && !check(value)
    {
        return Err(Error::Validation {
            item: info.name.clone(),
            value: value.to_string(),
        });
    }
    Ok(())
}

/// One column of a statement's output
#[derive(Debug, Clone)]
pub struct OutputItem {
    pub expr: Expression,
    pub info: Option<ItemInfo>,
}

impl OutputItem {
    pub fn new(expr: Expression) -> Self {
        Self { expr, info: None }
    }

    pub fn field(stream: usize, id: usize) -> Self {
        Self::new(Expression::Field { stream, id })
    }

    pub fn with_info(mut self, info: ItemInfo) -> Self {
        self.info = Some(info);
        self
    }

    /// Evaluate and validate the item for the current row
    pub fn materialize(&self, row: &Row, params: &[Value]) -> Result<Value> {
        let value = self.expr.evaluate(row, params)?;
        if let Some(info) = &self.info {
            validate(info, &value)?;
        }
        Ok(value)
    }
}

/// Write every output item of `row` into `message`
pub fn materialize_row(
    items: &[OutputItem],
    row: &Row,
    params: &[Value],
    format: &Format,
    message: &mut [u8],
) -> Result<()> {
    if format.column_count() != items.len() {
        return Err(Error::Malformed(keel_message::Error::MalformedFormat(
            format!(
                "output message has {} columns, statement returns {}",
                format.column_count(),
                items.len()
            ),
        )));
    }
    format.check_buffer(message)?;

    for (column, item) in items.iter().enumerate() {
        let value = item.materialize(row, params)?;
        format.write_column(message, column, &value)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_message::FormatBuilder;

    fn history() -> Arc<FormatHistory> {
        let v0 = vec![FieldDef::new("id", DataType::Integer)];
        let v1 = vec![
            FieldDef::new("id", DataType::Integer),
            FieldDef::new("name", DataType::Text),
        ];
        let v2 = vec![
            FieldDef::new("id", DataType::Integer),
            FieldDef::new("name", DataType::Text),
            FieldDef::new("status", DataType::Text).with_default(Value::from("new")),
        ];
        Arc::new(FormatHistory::new(v0).with_format(v1).with_format(v2))
    }

    #[test]
    fn test_stored_field_is_present() {
        let record = Record {
            history: history(),
            version: 0,
            values: vec![Value::I32(1)],
        };
        assert_eq!(record.field_value(0), FieldValue::Present(Value::I32(1)));
    }

    #[test]
    fn test_missing_field_takes_newer_default() {
        let record = Record {
            history: history(),
            version: 0,
            values: vec![Value::I32(1)],
        };
        assert_eq!(record.field_value(2), FieldValue::Defaulted(Value::from("new")));
    }

    #[test]
    fn test_missing_field_without_default_is_a_space() {
        let record = Record {
            history: history(),
            version: 0,
            values: vec![Value::I32(1)],
        };
        let field = record.field_value(1);
        assert_eq!(field, FieldValue::NotPresent);
        assert_eq!(field.value(), Value::from(" "));
        assert!(field.into_sql().is_null());
    }

    #[test]
    fn test_upgraded_values_follow_current_format() {
        let record = Record {
            history: history(),
            version: 1,
            values: vec![Value::I32(1), Value::from("a")],
        };
        assert_eq!(
            record.upgraded_values(),
            vec![Value::I32(1), Value::from("a"), Value::from("new")]
        );
    }

    #[test]
    fn test_validation_messages() {
        let info = ItemInfo::new("QTY").not_null().with_check(|v| match v {
            Value::I32(i) => *i > 0,
            _ => false,
        });

        let err = validate(&info, &Value::Null).unwrap_err();
        assert_eq!(
            err,
            Error::Validation {
                item: "QTY".into(),
                value: NULL_STRING_MARK.into()
            }
        );

        let err = validate(&info, &Value::I32(-3)).unwrap_err();
        assert_eq!(
            err,
            Error::Validation {
                item: "QTY".into(),
                value: "-3".into()
            }
        );

        assert!(validate(&info, &Value::I32(3)).is_ok());
    }

    #[test]
    fn test_materialize_row_writes_each_item() {
        let format = FormatBuilder::new().long(0).varying(8).build().unwrap();
        let items = vec![
            OutputItem::new(Expression::Parameter(0)),
            OutputItem::new(Expression::Literal(Value::from("x"))),
        ];
        let mut message = format.new_message();
        materialize_row(&items, &Row::default(), &[Value::I32(5)], &format, &mut message)
            .unwrap();
        assert_eq!(
            format.read_row(&message).unwrap(),
            vec![Value::I32(5), Value::from("x")]
        );
    }

    #[test]
    fn test_materialize_row_rejects_column_mismatch() {
        let format = FormatBuilder::new().long(0).build().unwrap();
        let mut message = format.new_message();
        let err = materialize_row(&[], &Row::default(), &[], &format, &mut message).unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));
    }
}
