/// Converts a 1-based line and column, as reported by `serde_json`, into a
/// byte offset into `source`. Positions past the end clamp to the end.
pub fn offset_of(source: &str, line: usize, column: usize) -> usize {
    if line == 0 {
        return 0;
    }
    let mut offset = 0;
    for (i, text) in source.split_inclusive('\n').enumerate() {
        if i + 1 == line {
            let within = text.trim_end_matches('\n').len();
            return offset + column.saturating_sub(1).min(within);
        }
        offset += text.len();
    }
    source.len()
}
