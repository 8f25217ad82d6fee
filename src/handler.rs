//! The exception table (JVMS §4.7.3) kept as an ordered list of ranges, plus
//! the range-splitting algorithm used to carve a handler's span when dead
//! code inside it gets excised.

use crate::byte_vec::ByteVector;
use crate::error::{KapiError, KapiResult};
use crate::label::{Label, LabelArena};

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Handler {
    pub start_pc: Label,
    pub end_pc: Label,
    pub handler_pc: Label,
    /// Constant-pool index of the caught exception's `Class` entry, or `0`
    /// for a `finally`-style catch-all (JVMS §4.7.3).
    pub catch_type: u16,
}

impl Handler {
    pub fn new(start_pc: Label, end_pc: Label, handler_pc: Label, catch_type: u16) -> Self {
        Self {
            start_pc,
            end_pc,
            handler_pc,
            catch_type,
        }
    }

    fn with_range(&self, start_pc: Label, end_pc: Label) -> Self {
        Self {
            start_pc,
            end_pc,
            handler_pc: self.handler_pc,
            catch_type: self.catch_type,
        }
    }
}

/// Removes the bytecode range `[start, end)` from every handler in `table`,
/// splitting a handler whose span straddles the removed range into the
/// surviving sub-ranges. Used when a basic block proven unreachable is
/// excised from the method body.
pub fn remove_range(
    table: &[Handler],
    arena: &LabelArena,
    start: Label,
    end: Option<Label>,
) -> KapiResult<Vec<Handler>> {
    let range_start = arena
        .offset(start)
        .ok_or_else(|| KapiError::invalid_state("resolved start label", "unresolved label"))?;
    let range_end = match end {
        Some(label) => arena
            .offset(label)
            .ok_or_else(|| KapiError::invalid_state("resolved end label", "unresolved label"))?,
        None => u32::MAX,
    };

    let mut result = Vec::with_capacity(table.len());
    for handler in table {
        let handler_start = arena.offset(handler.start_pc).ok_or_else(|| {
            KapiError::invalid_state("resolved handler start", "unresolved label")
        })?;
        let handler_end = arena
            .offset(handler.end_pc)
            .ok_or_else(|| KapiError::invalid_state("resolved handler end", "unresolved label"))?;

        if range_start >= handler_end || range_end <= handler_start {
            result.push(handler.clone());
        } else if range_start <= handler_start {
            if range_end >= handler_end {
                // Entirely consumed by the removed range.
            } else {
                result.push(handler.with_range(end.unwrap(), handler.end_pc));
            }
        } else if range_end >= handler_end {
            result.push(handler.with_range(handler.start_pc, start));
        } else {
            result.push(handler.with_range(handler.start_pc, start));
            result.push(handler.with_range(end.unwrap(), handler.end_pc));
        }
    }
    Ok(result)
}

pub fn write_exception_table(
    table: &[Handler],
    arena: &LabelArena,
    out: &mut ByteVector,
) -> KapiResult<()> {
    out.put_u16(table.len() as u16);
    for handler in table {
        let start = arena
            .offset(handler.start_pc)
            .ok_or_else(|| KapiError::invalid_state("resolved start label", "unresolved label"))?;
        let end = arena
            .offset(handler.end_pc)
            .ok_or_else(|| KapiError::invalid_state("resolved end label", "unresolved label"))?;
        let handler_pc = arena.offset(handler.handler_pc).ok_or_else(|| {
            KapiError::invalid_state("resolved handler label", "unresolved label")
        })?;
        out.put_u16(start as u16);
        out.put_u16(end as u16);
        out.put_u16(handler_pc as u16);
        out.put_u16(handler.catch_type);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved_label(arena: &mut LabelArena, offset: u32) -> Label {
        let label = arena.new_label();
        arena.resolve(label, offset);
        label
    }

    #[test]
    fn range_outside_handler_is_untouched() {
        let mut arena = LabelArena::new();
        let start = resolved_label(&mut arena, 10);
        let end = resolved_label(&mut arena, 20);
        let handler_pc = resolved_label(&mut arena, 0);
        let handler = Handler::new(start, end, handler_pc, 0);

        let removed_start = resolved_label(&mut arena, 0);
        let removed_end = resolved_label(&mut arena, 10);
        let result = remove_range(&[handler.clone()], &arena, removed_start, Some(removed_end)).unwrap();
        assert_eq!(result, vec![handler]);
    }

    #[test]
    fn range_covering_handler_removes_it() {
        let mut arena = LabelArena::new();
        let start = resolved_label(&mut arena, 10);
        let end = resolved_label(&mut arena, 20);
        let handler_pc = resolved_label(&mut arena, 0);
        let handler = Handler::new(start, end, handler_pc, 0);

        let removed_start = resolved_label(&mut arena, 0);
        let removed_end = resolved_label(&mut arena, 30);
        let result = remove_range(&[handler], &arena, removed_start, Some(removed_end)).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn range_inside_handler_splits_it_in_two() {
        let mut arena = LabelArena::new();
        let start = resolved_label(&mut arena, 10);
        let end = resolved_label(&mut arena, 20);
        let handler_pc = resolved_label(&mut arena, 0);
        let handler = Handler::new(start, end, handler_pc, 0);

        let removed_start = resolved_label(&mut arena, 13);
        let removed_end = resolved_label(&mut arena, 17);
        let result = remove_range(&[handler], &arena, removed_start, Some(removed_end)).unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(arena.offset(result[0].start_pc), Some(10));
        assert_eq!(arena.offset(result[0].end_pc), Some(13));
        assert_eq!(arena.offset(result[1].start_pc), Some(17));
        assert_eq!(arena.offset(result[1].end_pc), Some(20));
    }
}
