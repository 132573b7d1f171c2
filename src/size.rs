//! Output resolution selection for the still-capture surface.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A still-image resolution in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Full pixel area. Computed in `u64` so no candidate can overflow or
    /// truncate before comparison.
    pub fn area(self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    pub fn is_landscape(self) -> bool {
        self.width > self.height
    }

    /// Portrait-first normalization: landscape sizes are swapped.
    pub fn portrait(self) -> Self {
        if self.is_landscape() {
            Self::new(self.height, self.width)
        } else {
            self
        }
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Target aspect ratio `width:height`, also used as the minimum accepted size.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AspectRatio {
    pub width: u32,
    pub height: u32,
}

impl AspectRatio {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True when `size` has exactly this ratio (integer arithmetic, as the
    /// platform reports sizes) and is at least as large on both axes.
    pub fn accepts(self, size: Size) -> bool {
        if self.width == 0 {
            return false;
        }
        let expected_height =
            u64::from(size.width) * u64::from(self.height) / u64::from(self.width);
        u64::from(size.height) == expected_height
            && size.width >= self.width
            && size.height >= self.height
    }
}

impl Default for AspectRatio {
    fn default() -> Self {
        Self::new(1080, 768)
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.width, self.height)
    }
}

/// Pick the output size for a still capture.
///
/// Among the sizes accepted by `target`, the one with the smallest area wins;
/// on equal area the first in enumeration order is kept. With no accepted
/// size the first reported size is used. The result is normalized to
/// portrait. Returns `None` only when the device reports no sizes at all.
pub fn choose_optimal_size(choices: &[Size], target: AspectRatio) -> Option<Size> {
    let first = *choices.first()?;
    let smallest = choices
        .iter()
        .copied()
        .filter(|size| target.accepts(*size))
        .fold(None, |best: Option<Size>, candidate| match best {
            Some(best) if best.area() <= candidate.area() => Some(best),
            _ => Some(candidate),
        });
    Some(smallest.unwrap_or(first).portrait())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TARGET: AspectRatio = AspectRatio::new(1080, 768);

    #[test]
    fn picks_smallest_matching_size_and_rotates_to_portrait() {
        let choices = [
            Size::new(640, 480),
            Size::new(2160, 1536),
            Size::new(1080, 768),
            Size::new(1440, 1024),
        ];
        assert_eq!(
            choose_optimal_size(&choices, TARGET),
            Some(Size::new(768, 1080))
        );
    }

    #[test]
    fn falls_back_to_first_reported_size_when_nothing_matches() {
        let choices = [
            Size::new(640, 480),
            Size::new(1920, 1080),
            Size::new(1080, 1920),
        ];
        assert_eq!(
            choose_optimal_size(&choices, TARGET),
            Some(Size::new(480, 640))
        );
    }

    #[test]
    fn portrait_fallback_is_kept_as_is() {
        let choices = [Size::new(1080, 1920), Size::new(640, 480)];
        assert_eq!(
            choose_optimal_size(&choices, TARGET),
            Some(Size::new(1080, 1920))
        );
    }

    #[test]
    fn equal_area_keeps_enumeration_order() {
        let target = AspectRatio::new(1, 1);
        let choices = [Size::new(100, 100), Size::new(200, 200), Size::new(100, 100)];
        assert_eq!(choose_optimal_size(&choices, target), Some(Size::new(100, 100)));
    }

    #[test]
    fn minimum_area_uses_full_products() {
        // 4000x2844 and 3000x2133 both satisfy the ratio check; the smaller
        // area has to win regardless of division order.
        let choices = [Size::new(4000, 2844), Size::new(3000, 2133)];
        assert_eq!(
            choose_optimal_size(&choices, TARGET),
            Some(Size::new(2133, 3000))
        );
    }

    #[test]
    fn rejects_sizes_below_target() {
        assert!(!TARGET.accepts(Size::new(540, 384)));
        assert!(TARGET.accepts(Size::new(1080, 768)));
    }

    #[test]
    fn empty_choice_list_has_no_size() {
        assert_eq!(choose_optimal_size(&[], TARGET), None);
    }
}
