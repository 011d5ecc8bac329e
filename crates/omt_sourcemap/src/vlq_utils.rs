//! The base64 VLQ `mappings` field of a source map.

use std::iter::Peekable;

use crate::mapping::{Mapping, OriginalLocation};
use crate::mapping_line::MappingLine;
use crate::sourcemap_error::{SourceMapError, SourceMapErrorType};

/// Values the fields of the next segment are encoded relative to
#[derive(Default)]
struct Previous {
  source: i64,
  line: i64,
  column: i64,
  name: i64,
}

/// Decodes `mappings`, source and name indexes refer to the map's own tables
pub fn decode_mappings(mappings: &str) -> Result<Vec<Mapping>, SourceMapError> {
  let mut decoded = Vec::new();
  let mut input = mappings.bytes().peekable();
  let mut previous = Previous::default();
  let mut generated_line = 0;
  let mut generated_column = 0;

  while let Some(byte) = input.peek().copied() {
    match byte {
      b';' => {
        input.next();
        generated_line += 1;
        generated_column = 0;
      }
      b',' => {
        input.next();
      }
      _ => {
        read_relative_vlq(&mut generated_column, &mut input)?;

        let original = if at_segment_end(&mut input) {
          None
        } else {
          read_relative_vlq(&mut previous.source, &mut input)?;
          read_relative_vlq(&mut previous.line, &mut input)?;
          read_relative_vlq(&mut previous.column, &mut input)?;
          let name = if at_segment_end(&mut input) {
            None
          } else {
            read_relative_vlq(&mut previous.name, &mut input)?;
            Some(previous.name as u32)
          };
          Some(OriginalLocation::new(
            previous.line as u32,
            previous.column as u32,
            previous.source as u32,
            name,
          ))
        };

        decoded.push(Mapping {
          generated_line,
          generated_column: generated_column as u32,
          original,
        });
      }
    }
  }

  Ok(decoded)
}

/// Encodes `lines` as a `mappings` string, one `;` between generated lines
pub fn encode_mappings(lines: &[MappingLine]) -> Result<String, SourceMapError> {
  let mut output: Vec<u8> = Vec::new();
  let mut previous = Previous::default();

  for (index, line) in lines.iter().enumerate() {
    if index > 0 {
      output.push(b';');
    }

    let mut previous_column = 0;
    for (position, mapping) in line.mappings().iter().enumerate() {
      if position > 0 {
        output.push(b',');
      }
      write_relative_vlq(&mut output, &mut previous_column, mapping.generated_column)?;

      let Some(original) = &mapping.original else {
        continue;
      };
      write_relative_vlq(&mut output, &mut previous.source, original.source)?;
      write_relative_vlq(&mut output, &mut previous.line, original.original_line)?;
      write_relative_vlq(&mut output, &mut previous.column, original.original_column)?;
      if let Some(name) = original.name {
        write_relative_vlq(&mut output, &mut previous.name, name)?;
      }
    }
  }

  String::from_utf8(output).map_err(|_| SourceMapError::new(SourceMapErrorType::VlqInvalidBase64))
}

fn at_segment_end<B>(input: &mut Peekable<B>) -> bool
where
  B: Iterator<Item = u8>,
{
  input
    .peek()
    .is_none_or(|byte| *byte == b',' || *byte == b';')
}

/// Reads one VLQ value and adds it onto `previous`
fn read_relative_vlq<B>(previous: &mut i64, input: &mut Peekable<B>) -> Result<(), SourceMapError>
where
  B: Iterator<Item = u8>,
{
  let value = previous
    .checked_add(vlq::decode(input)?)
    .ok_or_else(|| SourceMapError::new_with_reason(SourceMapErrorType::UnexpectedlyBigNumber, "mapping value"))?;

  if value > i64::from(u32::MAX) {
    return Err(SourceMapError::new_with_reason(
      SourceMapErrorType::UnexpectedlyBigNumber,
      "mapping value",
    ));
  }
  if value < 0 {
    return Err(SourceMapError::new_with_reason(
      SourceMapErrorType::UnexpectedNegativeNumber,
      "mapping value",
    ));
  }

  *previous = value;
  Ok(())
}

fn write_relative_vlq(output: &mut Vec<u8>, previous: &mut i64, value: u32) -> Result<(), SourceMapError> {
  let value = i64::from(value);
  vlq::encode(value - *previous, output)?;
  *previous = value;
  Ok(())
}
