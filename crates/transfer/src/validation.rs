use std::collections::BTreeSet;

use scoreplay_protocol::CompletedPart;

use crate::TransferError;

/// Checks that a completion list covers exactly `1..=part_count`.
///
/// Rejects:
/// - Duplicate part numbers
/// - Gaps (reported together, ascending)
/// - Part numbers beyond `part_count`
/// - Entries with an empty token or checksum (reported as missing)
pub fn validate_completion(parts: &[CompletedPart], part_count: u32) -> Result<(), TransferError> {
    let mut seen = BTreeSet::new();
    for part in parts {
        if part.part_number == 0 || part.part_number > part_count {
            return Err(TransferError::PartOutOfRange {
                part: part.part_number,
                count: part_count,
            });
        }
        if !seen.insert(part.part_number) {
            return Err(TransferError::DuplicatePart(part.part_number));
        }
    }

    let incomplete: BTreeSet<u32> = parts
        .iter()
        .filter(|p| p.etag.is_empty() || p.checksum.is_empty())
        .map(|p| p.part_number)
        .collect();

    let missing: Vec<u32> = (1..=part_count)
        .filter(|n| !seen.contains(n) || incomplete.contains(n))
        .collect();
    if !missing.is_empty() {
        return Err(TransferError::MissingParts(missing));
    }

    Ok(())
}
