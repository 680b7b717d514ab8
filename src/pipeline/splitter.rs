//! Splits a raw BDSIA dump into candidate record blocks.
//!
//! Every record in the export is preceded by the literal `*BDSIA` banner.
//! The only validity gate at this stage is the presence of the
//! authorization-number marker: a fragment without `NUMERO DO APAC` is a
//! page header or trailer, not a record, and is dropped silently.

/// Banner token preceding every record in the dump.
const BLOCK_DELIMITER: &str = "*BDSIA";

/// Marker that distinguishes a real record from surrounding noise.
pub const APAC_NUMBER_MARKER: &str = "NUMERO DO APAC";

/// Split the raw dump into record blocks, in source order.
///
/// An empty result means the file holds no usable records; the batch
/// assembler turns that into [`PipelineError::NoValidRecords`]
/// (never a panic here).
///
/// [`PipelineError::NoValidRecords`]: super::PipelineError::NoValidRecords
pub fn split_blocks(content: &str) -> Vec<String> {
    content
        .split(BLOCK_DELIMITER)
        .filter(|block| block.contains(APAC_NUMBER_MARKER))
        .map(str::to_owned)
        .collect()
}
