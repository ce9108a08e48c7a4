//! Decoding of binlog row images.
//!
//! Row events carry their values in the binlog's packed encoding; the column
//! types and metadata from the owning TABLE_MAP event drive the decode. The
//! writers turn the resulting [`Value`]s into SQL literals.

use chrono::DateTime;

use crate::codec::Reader;
use crate::error::{CdcResult, ErrorKind};
use crate::types::{RowsKind, TableMapEvent};
use crate::{bail, cdc_error};

const TYPE_DECIMAL: u8 = 0x00;
const TYPE_TINY: u8 = 0x01;
const TYPE_SHORT: u8 = 0x02;
const TYPE_LONG: u8 = 0x03;
const TYPE_FLOAT: u8 = 0x04;
const TYPE_DOUBLE: u8 = 0x05;
const TYPE_NULL: u8 = 0x06;
const TYPE_TIMESTAMP: u8 = 0x07;
const TYPE_LONGLONG: u8 = 0x08;
const TYPE_INT24: u8 = 0x09;
const TYPE_DATE: u8 = 0x0a;
const TYPE_TIME: u8 = 0x0b;
const TYPE_DATETIME: u8 = 0x0c;
const TYPE_YEAR: u8 = 0x0d;
const TYPE_NEWDATE: u8 = 0x0e;
const TYPE_VARCHAR: u8 = 0x0f;
const TYPE_BIT: u8 = 0x10;
const TYPE_TIMESTAMP2: u8 = 0x11;
const TYPE_DATETIME2: u8 = 0x12;
const TYPE_TIME2: u8 = 0x13;
const TYPE_JSON: u8 = 0xf5;
const TYPE_NEWDECIMAL: u8 = 0xf6;
const TYPE_ENUM: u8 = 0xf7;
const TYPE_SET: u8 = 0xf8;
const TYPE_TINY_BLOB: u8 = 0xf9;
const TYPE_MEDIUM_BLOB: u8 = 0xfa;
const TYPE_LONG_BLOB: u8 = 0xfb;
const TYPE_BLOB: u8 = 0xfc;
const TYPE_VAR_STRING: u8 = 0xfd;
const TYPE_STRING: u8 = 0xfe;
const TYPE_GEOMETRY: u8 = 0xff;

/// Bytes of table-map metadata each column type carries.
fn metadata_len(type_code: u8) -> usize {
    match type_code {
        TYPE_BIT | TYPE_ENUM | TYPE_SET | TYPE_NEWDECIMAL | TYPE_DECIMAL | TYPE_VARCHAR
        | TYPE_VAR_STRING | TYPE_STRING => 2,
        TYPE_TINY_BLOB | TYPE_MEDIUM_BLOB | TYPE_LONG_BLOB | TYPE_BLOB | TYPE_FLOAT
        | TYPE_DOUBLE | TYPE_TIMESTAMP2 | TYPE_DATETIME2 | TYPE_TIME2 | TYPE_JSON
        | TYPE_GEOMETRY => 1,
        _ => 0,
    }
}

/// One decoded column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone)]
struct Column {
    type_code: u8,
    metadata: [u8; 2],
}

/// Column layout of one replicated table, extracted from its TABLE_MAP
/// event.
#[derive(Debug, Clone)]
pub struct TableSchema {
    columns: Vec<Column>,
}

impl TableSchema {
    /// Builds the schema, validating that the metadata block matches the
    /// column types. A mismatch means the table cannot be decoded and the
    /// writer must not be opened.
    pub fn from_table_map(table_map: &TableMapEvent) -> CdcResult<Self> {
        let mut columns = Vec::with_capacity(table_map.column_types.len());
        let mut offset = 0;

        for &type_code in &table_map.column_types {
            let len = metadata_len(type_code);
            let Some(slice) = table_map.column_metadata.get(offset..offset + len) else {
                bail!(
                    ErrorKind::TableOpenFailed,
                    "table map metadata is shorter than its column types",
                    format!("{}.{}", table_map.database, table_map.table)
                );
            };

            let mut metadata = [0u8; 2];
            metadata[..len].copy_from_slice(slice);
            columns.push(Column {
                type_code,
                metadata,
            });
            offset += len;
        }

        if offset != table_map.column_metadata.len() {
            bail!(
                ErrorKind::TableOpenFailed,
                "table map metadata is longer than its column types",
                format!("{}.{}", table_map.database, table_map.table)
            );
        }

        Ok(Self { columns })
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }
}

/// Decodes every row image of a rows-event payload.
///
/// Update events contribute two images per row, before and after, in stream
/// order.
pub fn decode_rows(
    schema: &TableSchema,
    kind: RowsKind,
    payload: &[u8],
) -> CdcResult<Vec<Vec<Value>>> {
    let mut reader = Reader::new(payload);

    let column_count = reader.lenenc_int()? as usize;
    if column_count != schema.column_count() {
        bail!(
            ErrorKind::ProtocolViolation,
            "rows event disagrees with the table map about column count",
            format!("{column_count} vs {}", schema.column_count())
        );
    }

    let bitmap_len = column_count.div_ceil(8);
    let present = reader.bytes(bitmap_len)?.to_vec();
    let present_update = match kind {
        RowsKind::Update => Some(reader.bytes(bitmap_len)?.to_vec()),
        _ => None,
    };

    let mut rows = Vec::new();
    while reader.remaining() > 0 {
        rows.push(decode_image(&mut reader, schema, &present)?);
        if let Some(after) = &present_update {
            rows.push(decode_image(&mut reader, schema, after)?);
        }
    }

    Ok(rows)
}

fn bit(bitmap: &[u8], index: usize) -> bool {
    bitmap
        .get(index / 8)
        .is_some_and(|byte| byte & (1 << (index % 8)) != 0)
}

fn decode_image(
    reader: &mut Reader<'_>,
    schema: &TableSchema,
    present: &[u8],
) -> CdcResult<Vec<Value>> {
    let included = (0..schema.columns.len())
        .filter(|&i| bit(present, i))
        .count();
    let null_bitmap = reader.bytes(included.div_ceil(8))?.to_vec();

    let mut values = Vec::with_capacity(schema.columns.len());
    let mut null_index = 0;

    for (index, column) in schema.columns.iter().enumerate() {
        if !bit(present, index) {
            continue;
        }

        if bit(&null_bitmap, null_index) {
            values.push(Value::Null);
        } else {
            values.push(decode_value(reader, column)?);
        }
        null_index += 1;
    }

    Ok(values)
}

fn decode_value(reader: &mut Reader<'_>, column: &Column) -> CdcResult<Value> {
    let meta = column.metadata;

    match column.type_code {
        TYPE_TINY => Ok(Value::Int(i64::from(reader.u8()? as i8))),
        TYPE_SHORT => Ok(Value::Int(i64::from(reader.u16_le()? as i16))),
        TYPE_INT24 => {
            let raw = reader.u24_le()?;
            let signed = if raw & 0x80_0000 != 0 {
                i64::from(raw) - 0x100_0000
            } else {
                i64::from(raw)
            };
            Ok(Value::Int(signed))
        }
        TYPE_LONG => Ok(Value::Int(i64::from(reader.u32_le()? as i32))),
        TYPE_LONGLONG => Ok(Value::Int(reader.u64_le()? as i64)),
        TYPE_FLOAT => {
            let bits = reader.u32_le()?;
            Ok(Value::Float(f64::from(f32::from_bits(bits))))
        }
        TYPE_DOUBLE => {
            let bits = reader.u64_le()?;
            Ok(Value::Float(f64::from_bits(bits)))
        }
        TYPE_YEAR => {
            let raw = reader.u8()?;
            let year = if raw == 0 { 0 } else { 1900 + i64::from(raw) };
            Ok(Value::Int(year))
        }

        TYPE_DATE | TYPE_NEWDATE => {
            let raw = reader.u24_le()?;
            let day = raw & 0x1f;
            let month = (raw >> 5) & 0x0f;
            let year = raw >> 9;
            Ok(Value::Text(format!("{year:04}-{month:02}-{day:02}")))
        }
        TYPE_TIME => {
            let raw = reader.u24_le()?;
            let hours = raw / 10_000;
            let minutes = (raw / 100) % 100;
            let seconds = raw % 100;
            Ok(Value::Text(format!("{hours:02}:{minutes:02}:{seconds:02}")))
        }
        TYPE_TIME2 => {
            let raw = reader.uint_be(3)?;
            reader.skip(fractional_bytes(meta[0]))?;

            let (sign, packed) = if raw & 0x80_0000 != 0 {
                ("", raw)
            } else {
                ("-", 0x100_0000 - raw)
            };
            let hours = (packed >> 12) & 0x3ff;
            let minutes = (packed >> 6) & 0x3f;
            let seconds = packed & 0x3f;
            Ok(Value::Text(format!(
                "{sign}{hours:02}:{minutes:02}:{seconds:02}"
            )))
        }
        TYPE_DATETIME => {
            let raw = reader.u64_le()?;
            let date = raw / 1_000_000;
            let time = raw % 1_000_000;
            Ok(Value::Text(format!(
                "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                date / 10_000,
                (date / 100) % 100,
                date % 100,
                time / 10_000,
                (time / 100) % 100,
                time % 100,
            )))
        }
        TYPE_DATETIME2 => {
            let raw = reader.uint_be(5)?;
            reader.skip(fractional_bytes(meta[0]))?;

            // Offset-encoded: the top (sign) bit is set for valid values.
            let packed = raw.wrapping_sub(0x80_0000_0000);
            let year_month = (packed >> 22) & 0x1_ffff;
            Ok(Value::Text(format!(
                "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                year_month / 13,
                year_month % 13,
                (packed >> 17) & 0x1f,
                (packed >> 12) & 0x1f,
                (packed >> 6) & 0x3f,
                packed & 0x3f,
            )))
        }
        TYPE_TIMESTAMP => {
            let seconds = reader.u32_le()?;
            Ok(Value::Text(format_unix_timestamp(i64::from(seconds))))
        }
        TYPE_TIMESTAMP2 => {
            let seconds = reader.uint_be(4)?;
            reader.skip(fractional_bytes(meta[0]))?;
            Ok(Value::Text(format_unix_timestamp(seconds as i64)))
        }

        TYPE_VARCHAR | TYPE_VAR_STRING => {
            let max_len = u16::from_le_bytes(meta);
            let len = if max_len > 255 {
                reader.u16_le()? as usize
            } else {
                reader.u8()? as usize
            };
            Ok(Value::Text(reader.string(len)?))
        }
        TYPE_STRING => decode_fixed_string(reader, meta),
        TYPE_ENUM => {
            let len = usize::from(meta[1]).clamp(1, 2);
            Ok(Value::Int(reader.uint_le(len)? as i64))
        }
        TYPE_SET => {
            let len = usize::from(meta[1]).clamp(1, 8);
            Ok(Value::Int(reader.uint_le(len)? as i64))
        }
        TYPE_BIT => {
            let len = usize::from(meta[1]) + usize::from(meta[0] > 0);
            Ok(Value::Int(reader.uint_be(len.clamp(1, 8))? as i64))
        }

        TYPE_TINY_BLOB | TYPE_MEDIUM_BLOB | TYPE_LONG_BLOB | TYPE_BLOB | TYPE_JSON
        | TYPE_GEOMETRY => {
            let len_size = usize::from(meta[0]).clamp(1, 4);
            let len = reader.uint_le(len_size)? as usize;
            Ok(Value::Bytes(reader.bytes(len)?.to_vec()))
        }

        TYPE_NEWDECIMAL => decode_decimal(reader, meta[0], meta[1]),
        TYPE_NULL => Ok(Value::Null),

        other => Err(cdc_error!(
            ErrorKind::UnsupportedColumnType,
            "cannot decode column type",
            format!("0x{other:02x}")
        )),
    }
}

/// ENUM and SET columns arrive as STRING with the real type in the first
/// metadata byte; everything else is a fixed-width string whose declared
/// length hides two extra bits in the metadata.
fn decode_fixed_string(reader: &mut Reader<'_>, meta: [u8; 2]) -> CdcResult<Value> {
    match meta[0] {
        TYPE_ENUM => {
            let len = usize::from(meta[1]).clamp(1, 2);
            Ok(Value::Int(reader.uint_le(len)? as i64))
        }
        TYPE_SET => {
            let len = usize::from(meta[1]).clamp(1, 8);
            Ok(Value::Int(reader.uint_le(len)? as i64))
        }
        _ => {
            let packed = u16::from(meta[1]) | u16::from(meta[0]) << 8;
            let extra = ((packed >> 4) & 0x300) ^ 0x300;
            let field_len = (packed & 0xff) + extra;

            let len = if field_len > 255 {
                reader.u16_le()? as usize
            } else {
                reader.u8()? as usize
            };
            Ok(Value::Text(reader.string(len)?))
        }
    }
}

fn fractional_bytes(fsp: u8) -> usize {
    usize::from(fsp.min(6)).div_ceil(2)
}

fn format_unix_timestamp(seconds: i64) -> String {
    if seconds == 0 {
        return "0000-00-00 00:00:00".to_owned();
    }

    DateTime::from_timestamp(seconds, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "0000-00-00 00:00:00".to_owned())
}

/// Bytes used by a partial group of decimal digits.
const DIGITS_TO_BYTES: [usize; 10] = [0, 1, 1, 2, 2, 3, 3, 4, 4, 4];
const DIGITS_PER_GROUP: usize = 9;

fn decode_decimal(reader: &mut Reader<'_>, precision: u8, scale: u8) -> CdcResult<Value> {
    let precision = usize::from(precision);
    let scale = usize::from(scale);
    if scale > precision || precision == 0 {
        bail!(
            ErrorKind::ProtocolViolation,
            "invalid decimal precision and scale",
            format!("({precision},{scale})")
        );
    }

    let integral = precision - scale;
    let int_groups = integral / DIGITS_PER_GROUP;
    let int_extra = integral % DIGITS_PER_GROUP;
    let frac_groups = scale / DIGITS_PER_GROUP;
    let frac_extra = scale % DIGITS_PER_GROUP;

    let total = int_groups * 4
        + DIGITS_TO_BYTES[int_extra]
        + frac_groups * 4
        + DIGITS_TO_BYTES[frac_extra];
    let mut buf = reader.bytes(total)?.to_vec();

    let negative = buf[0] & 0x80 == 0;
    buf[0] ^= 0x80;
    if negative {
        for byte in &mut buf {
            *byte = !*byte;
        }
    }

    let mut pos = 0;
    let mut read_group = |digits: usize| -> u32 {
        let mut value: u32 = 0;
        for _ in 0..DIGITS_TO_BYTES[digits] {
            value = value << 8 | u32::from(buf[pos]);
            pos += 1;
        }
        value
    };

    let mut integer = String::new();
    if int_extra > 0 {
        integer.push_str(&read_group(int_extra).to_string());
    }
    for _ in 0..int_groups {
        let group = read_group(DIGITS_PER_GROUP);
        if integer.is_empty() {
            integer.push_str(&group.to_string());
        } else {
            integer.push_str(&format!("{group:09}"));
        }
    }
    if integer.is_empty() {
        integer.push('0');
    }

    let mut fraction = String::new();
    for _ in 0..frac_groups {
        fraction.push_str(&format!("{:09}", read_group(DIGITS_PER_GROUP)));
    }
    if frac_extra > 0 {
        fraction.push_str(&format!(
            "{:0width$}",
            read_group(frac_extra),
            width = frac_extra
        ));
    }

    let sign = if negative { "-" } else { "" };
    let text = if fraction.is_empty() {
        format!("{sign}{integer}")
    } else {
        format!("{sign}{integer}.{fraction}")
    };

    Ok(Value::Text(text))
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn schema(column_types: &[u8], metadata: &[u8]) -> TableSchema {
        TableSchema::from_table_map(&TableMapEvent {
            table_id: 1,
            database: "db".to_owned(),
            table: "t1".to_owned(),
            column_types: column_types.to_vec(),
            column_metadata: Bytes::copy_from_slice(metadata),
        })
        .unwrap()
    }

    #[test]
    fn mismatched_metadata_fails_schema_construction() {
        let result = TableSchema::from_table_map(&TableMapEvent {
            table_id: 1,
            database: "db".to_owned(),
            table: "t1".to_owned(),
            column_types: vec![TYPE_VARCHAR],
            column_metadata: Bytes::from_static(&[0xff]), // needs 2 bytes
        });

        assert_eq!(result.unwrap_err().kind(), ErrorKind::TableOpenFailed);
    }

    #[test]
    fn numeric_and_varchar_row_decodes() {
        let schema = schema(&[TYPE_LONG, TYPE_VARCHAR], &[0x40, 0x00]);

        let payload = [
            0x02, // column count
            0x03, // present bitmap: both columns
            0x00, // null bitmap
            0x2a, 0x00, 0x00, 0x00, // 42
            0x02, b'h', b'i', // "hi"
        ];
        let rows = decode_rows(&schema, RowsKind::Write, &payload).unwrap();

        assert_eq!(rows, vec![vec![
            Value::Int(42),
            Value::Text("hi".to_owned())
        ]]);
    }

    #[test]
    fn null_bits_map_to_null_values() {
        let schema = schema(&[TYPE_LONG, TYPE_LONG], &[]);

        let payload = [
            0x02, // column count
            0x03, // present bitmap
            0x02, // null bitmap: second column is NULL
            0x07, 0x00, 0x00, 0x00,
        ];
        let rows = decode_rows(&schema, RowsKind::Write, &payload).unwrap();

        assert_eq!(rows, vec![vec![Value::Int(7), Value::Null]]);
    }

    #[test]
    fn update_events_yield_before_and_after_images() {
        let schema = schema(&[TYPE_LONG], &[]);

        let payload = [
            0x01, // column count
            0x01, // before-image bitmap
            0x01, // after-image bitmap
            0x00, 0x01, 0x00, 0x00, 0x00, // before: 1
            0x00, 0x02, 0x00, 0x00, 0x00, // after: 2
        ];
        let rows = decode_rows(&schema, RowsKind::Update, &payload).unwrap();

        assert_eq!(rows, vec![vec![Value::Int(1)], vec![Value::Int(2)]]);
    }

    #[test]
    fn multiple_rows_per_event_decode_in_order() {
        let schema = schema(&[TYPE_TINY], &[]);

        let payload = [
            0x01, 0x01, // header
            0x00, 0x05, // row 1
            0x00, 0xfb, // row 2: -5 as i8
        ];
        let rows = decode_rows(&schema, RowsKind::Write, &payload).unwrap();

        assert_eq!(rows, vec![vec![Value::Int(5)], vec![Value::Int(-5)]]);
    }

    #[test]
    fn signed_integers_are_sign_extended() {
        let schema = schema(&[TYPE_INT24], &[]);

        let payload = [0x01, 0x01, 0x00, 0xff, 0xff, 0xff];
        let rows = decode_rows(&schema, RowsKind::Write, &payload).unwrap();

        assert_eq!(rows, vec![vec![Value::Int(-1)]]);
    }

    #[test]
    fn dates_format_as_iso() {
        let schema = schema(&[TYPE_DATE], &[]);

        // 2024-03-05: 5 | 3 << 5 | 2024 << 9
        let payload = [0x01, 0x01, 0x00, 0xe5, 0xd0, 0x0f];
        let rows = decode_rows(&schema, RowsKind::Write, &payload).unwrap();

        assert_eq!(rows, vec![vec![Value::Text("2024-03-05".to_owned())]]);
    }

    #[test]
    fn decimals_keep_sign_and_scale() {
        let schema = schema(&[TYPE_NEWDECIMAL, TYPE_NEWDECIMAL], &[4, 2, 4, 2]);

        let payload = [
            0x02, 0x03, // header
            0x00, // null bitmap
            0x8c, 0x22, // 12.34
            0x73, 0xdd, // -12.34
        ];
        let rows = decode_rows(&schema, RowsKind::Write, &payload).unwrap();

        assert_eq!(rows, vec![vec![
            Value::Text("12.34".to_owned()),
            Value::Text("-12.34".to_owned()),
        ]]);
    }

    #[test]
    fn blobs_decode_with_metadata_sized_lengths() {
        let schema = schema(&[TYPE_BLOB], &[2]);

        let payload = [0x01, 0x01, 0x00, 0x03, 0x00, 0x01, 0x02, 0x03];
        let rows = decode_rows(&schema, RowsKind::Write, &payload).unwrap();

        assert_eq!(rows, vec![vec![Value::Bytes(vec![1, 2, 3])]]);
    }

    #[test]
    fn unsupported_types_error_instead_of_corrupting() {
        // The pre-5.0 DECIMAL encoding is not decodable.
        let schema = schema(&[TYPE_DECIMAL], &[10, 2]);
        let payload = [0x01, 0x01, 0x00, 0x01];

        let err = decode_rows(&schema, RowsKind::Write, &payload).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::UnsupportedColumnType);
    }
}
