use crate::{PositionBlock, StatusCode};

/// Summary returned by the `Stat` opcode: file-spec echo plus live counters.
#[derive(Clone, Debug)]
pub struct FileStat {
    pub record_length: u16,
    pub page_size: u16,
    pub num_keys: u16,
    pub record_count: u64,
}

/// Render a `FileStat` the way a diagnostic client or log line would want
/// it: one line, fixed field order.
pub fn format_file_stat(stat: &FileStat) -> String {
    format!(
        "record_length={} page_size={} num_keys={} record_count={}",
        stat.record_length, stat.page_size, stat.num_keys, stat.record_count
    )
}

/// Render a position block for logging: never the raw 128 bytes, just the
/// fields that matter for diagnosing a stuck cursor.
pub fn format_position_block(block: &PositionBlock) -> String {
    if block.is_null() {
        return "<unopened>".into();
    }
    match block.record_id() {
        Some(rid) => format!(
            "file={} gen={} key#={} at=({}, {})",
            block.file_id.0, block.generation, block.key_number, rid.page_id.0, rid.slot
        ),
        None => format!(
            "file={} gen={} key#={} <unpositioned>",
            block.file_id.0, block.generation, block.key_number
        ),
    }
}

/// Render a status code as its numeric wire value plus a short mnemonic,
/// e.g. `"4 (KeyNotFound)"`.
pub fn format_status(status: StatusCode) -> String {
    format!("{} ({status:?})", status.code())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FileId, PageId, RecordId};

    #[test]
    fn file_stat_renders_all_fields() {
        let stat = FileStat {
            record_length: 100,
            page_size: 4096,
            num_keys: 1,
            record_count: 42,
        };
        let rendered = format_file_stat(&stat);
        assert!(rendered.contains("record_length=100"));
        assert!(rendered.contains("record_count=42"));
    }

    #[test]
    fn unopened_position_block_renders_placeholder() {
        assert_eq!(format_position_block(&PositionBlock::null()), "<unopened>");
    }

    #[test]
    fn positioned_block_renders_record_id() {
        let mut block = PositionBlock::new(FileId(1), 7);
        block.reposition(
            RecordId {
                page_id: PageId(3),
                slot: 2,
            },
            0,
        );
        let rendered = format_position_block(&block);
        assert!(rendered.contains("at=(3, 2)"));
    }

    #[test]
    fn status_renders_code_and_name() {
        assert_eq!(format_status(StatusCode::KeyNotFound), "4 (KeyNotFound)");
    }
}
