//! Part-size planning
//!
//! S3 caps a multipart upload at 10000 parts and 5 TiB. The part size starts
//! at 64 MiB and grows in 16 MiB steps until the object fits.

use super::UploadError;

/// Minimum part size (5MB) - S3 requirement, except for the last part
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Maximum part size (5GB)
pub const MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Maximum parts allowed
pub const MAX_PARTS: u64 = 10_000;

/// Maximum object size (5TB)
pub const MAX_OBJECT_SIZE: u64 = 5 * 1024 * 1024 * 1024 * 1024;

/// Part size used for objects below 640 MiB
pub const DEFAULT_PART_SIZE: u64 = 64 * 1024 * 1024;

/// Step by which the part size grows
pub const PART_SIZE_INCREMENT: u64 = 16 * 1024 * 1024;

/// Part size for an object of `size` bytes
///
/// An override is returned as is, provided `MAX_PARTS` parts of that size
/// hold `size` bytes. Otherwise the smallest size of the form
/// `DEFAULT_PART_SIZE + k * PART_SIZE_INCREMENT` such that
/// `part_size * MAX_PARTS > size`. Sizes above [`MAX_OBJECT_SIZE`] are
/// rejected, override or not.
pub fn calculate_part_size(size: u64, override_size: Option<u64>) -> Result<u64, UploadError> {
    if size > MAX_OBJECT_SIZE {
        return Err(UploadError::ObjectTooLarge {
            size,
            max: MAX_OBJECT_SIZE,
        });
    }
    if let Some(part_size) = override_size {
        let capacity = part_size.saturating_mul(MAX_PARTS);
        if capacity < size {
            return Err(UploadError::ObjectTooLarge {
                size,
                max: capacity,
            });
        }
        return Ok(part_size);
    }

    let mut part_size = DEFAULT_PART_SIZE;
    while part_size * MAX_PARTS <= size {
        part_size += PART_SIZE_INCREMENT;
    }
    Ok(part_size)
}

/// Number of parts an even split of `size` bytes needs
fn parts_required(size: u64) -> u64 {
    // ceil(size / (MAX_OBJECT_SIZE / (MAX_PARTS - 1))) without rounding the divisor
    let numerator = size as u128 * (MAX_PARTS - 1) as u128;
    let denominator = MAX_OBJECT_SIZE as u128;
    numerator.div_ceil(denominator) as u64
}

/// Inclusive byte range of one part
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartRange {
    pub start: u64,
    pub end: u64,
}

impl PartRange {
    /// Number of bytes in the range
    pub fn size(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Split `size` bytes starting at `start` into near-equal contiguous parts
///
/// Returns `None` for an empty object, for one larger than
/// [`MAX_OBJECT_SIZE`], and when the range would run past `u64::MAX`. The
/// remainder of the division is spread one byte at a time over the first parts.
pub fn calculate_even_splits(size: u64, start: u64) -> Option<Vec<PartRange>> {
    if size == 0 || size > MAX_OBJECT_SIZE {
        return None;
    }
    // Last byte of the whole range
    start.checked_add(size - 1)?;

    let parts = parts_required(size).max(1);
    let base = size / parts;
    let remainder = size % parts;

    let mut ranges = Vec::with_capacity(parts as usize);
    let mut next = start;
    for i in 0..parts {
        let len = if i < remainder { base + 1 } else { base };
        let range = PartRange {
            start: next,
            end: next + (len - 1),
        };
        next = range.end.saturating_add(1);
        ranges.push(range);
    }
    Some(ranges)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;
    const GIB: u64 = 1024 * MIB;

    #[test]
    fn test_small_objects_use_default() {
        assert_eq!(calculate_part_size(0, None).unwrap(), DEFAULT_PART_SIZE);
        assert_eq!(calculate_part_size(1, None).unwrap(), DEFAULT_PART_SIZE);
        assert_eq!(calculate_part_size(100 * MIB, None).unwrap(), DEFAULT_PART_SIZE);
    }

    #[test]
    fn test_part_size_grows_at_boundary() {
        let boundary = DEFAULT_PART_SIZE * MAX_PARTS;
        assert_eq!(calculate_part_size(boundary - 1, None).unwrap(), DEFAULT_PART_SIZE);
        assert_eq!(
            calculate_part_size(boundary, None).unwrap(),
            DEFAULT_PART_SIZE + PART_SIZE_INCREMENT
        );
    }

    #[test]
    fn test_part_size_invariant() {
        let sizes = [
            1,
            5 * MIB,
            640 * GIB,
            641 * GIB,
            1024 * GIB,
            3 * 1024 * GIB + 17,
            MAX_OBJECT_SIZE - 1,
            MAX_OBJECT_SIZE,
        ];
        for size in sizes {
            let part_size = calculate_part_size(size, None).unwrap();
            assert!(part_size * MAX_PARTS > size, "size {}", size);
            assert_eq!((part_size - DEFAULT_PART_SIZE) % PART_SIZE_INCREMENT, 0);
            assert!(part_size <= MAX_PART_SIZE);
        }
    }

    #[test]
    fn test_too_large_rejected() {
        let result = calculate_part_size(MAX_OBJECT_SIZE + 1, None);
        assert!(matches!(result, Err(UploadError::ObjectTooLarge { .. })));

        let result = calculate_part_size(MAX_OBJECT_SIZE + 1, Some(MIN_PART_SIZE));
        assert!(matches!(result, Err(UploadError::ObjectTooLarge { .. })));
    }

    #[test]
    fn test_override_wins() {
        assert_eq!(calculate_part_size(10 * GIB, Some(8 * MIB)).unwrap(), 8 * MIB);
        assert_eq!(
            calculate_part_size(MIN_PART_SIZE * MAX_PARTS, Some(MIN_PART_SIZE)).unwrap(),
            MIN_PART_SIZE
        );
    }

    #[test]
    fn test_override_too_small_for_size() {
        let size = MIN_PART_SIZE * MAX_PARTS + 1;
        let result = calculate_part_size(size, Some(MIN_PART_SIZE));
        assert!(matches!(
            result,
            Err(UploadError::ObjectTooLarge { max, .. }) if max == MIN_PART_SIZE * MAX_PARTS
        ));
    }

    #[test]
    fn test_even_splits_too_large() {
        assert!(calculate_even_splits(MAX_OBJECT_SIZE + 1, 0).is_none());
        assert!(calculate_even_splits(u64::MAX, 0).is_none());
    }

    #[test]
    fn test_even_splits_near_end_of_range() {
        assert!(calculate_even_splits(2, u64::MAX).is_none());
        assert!(calculate_even_splits(100, u64::MAX - 98).is_none());

        let splits = calculate_even_splits(100, u64::MAX - 99).unwrap();
        assert_eq!(splits.len(), 1);
        assert_eq!(splits[0].end, u64::MAX);

        let splits = calculate_even_splits(1, u64::MAX).unwrap();
        assert_eq!(splits, vec![PartRange { start: u64::MAX, end: u64::MAX }]);
    }

    #[test]
    fn test_even_splits_empty() {
        assert!(calculate_even_splits(0, 0).is_none());
    }

    #[test]
    fn test_even_splits_single_part() {
        let splits = calculate_even_splits(100, 10).unwrap();
        assert_eq!(splits, vec![PartRange { start: 10, end: 109 }]);
        assert_eq!(splits[0].size(), 100);
    }

    #[test]
    fn test_even_splits_cover_range() {
        let size = 2 * GIB + 3;
        let splits = calculate_even_splits(size, 0).unwrap();
        assert_eq!(splits.len() as u64, parts_required(size));
        assert!(splits.len() > 1);
        assert_eq!(splits.first().unwrap().start, 0);
        assert_eq!(splits.last().unwrap().end, size - 1);

        for pair in splits.windows(2) {
            assert_eq!(pair[0].end + 1, pair[1].start);
            assert!(pair[0].size() >= pair[1].size());
            assert!(pair[0].size() - pair[1].size() <= 1);
        }
        let total: u64 = splits.iter().map(PartRange::size).sum();
        assert_eq!(total, size);
    }

    #[test]
    fn test_parts_required_bounds() {
        assert_eq!(parts_required(1), 1);
        assert_eq!(parts_required(MAX_OBJECT_SIZE), MAX_PARTS - 1);
    }
}
