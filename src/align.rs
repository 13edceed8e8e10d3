/// Rounds `value` up to the next multiple of `align`, which must be a power
/// of two. Values already on a boundary are returned unchanged.
///
/// # Examples
///
/// ```rust
/// use pageheap::align_to;
///
/// assert_eq!(align_to!(100, 16), 112);
/// assert_eq!(align_to!(160, 16), 160);
/// assert_eq!(align_to!(1, 8), 8);
/// ```
#[macro_export]
macro_rules! align_to {
  ($value:expr, $align:expr) => {
    (($value) + ($align) - 1) & !(($align) - 1)
  };
}
