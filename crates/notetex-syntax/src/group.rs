//! Balanced group extraction for brace (`{...}`) and bracket (`[...]`) arguments.

/// A group cut from the front of a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Group<'a> {
    /// Text between the outer delimiters.
    pub content: &'a str,
    /// Bytes consumed, delimiters included.
    pub len: usize,
}

/// Extracts the brace group at the start of `text`.
///
/// Depth goes up on `{` and down on `}`; the group ends when depth returns to
/// zero. Returns `None` when `text` does not start with `{` or the group never
/// closes.
///
/// ```
/// use notetex_syntax::group::balanced_group;
///
/// let group = balanced_group(r"{\frac{a}{b}} rest").unwrap();
/// assert_eq!(group.content, r"\frac{a}{b}");
/// assert_eq!(group.len, 13);
/// ```
pub fn balanced_group(text: &str) -> Option<Group<'_>> {
    if !text.starts_with('{') {
        return None;
    }
    let mut depth = 0usize;
    for (index, byte) in text.bytes().enumerate() {
        match byte {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(Group {
                        content: &text[1..index],
                        len: index + 1,
                    });
                }
            }
            _ => {}
        }
    }
    None
}

/// Extracts a `[...]` group at the start of `text`. Brackets do not nest.
pub fn bracket_group(text: &str) -> Option<Group<'_>> {
    let rest = text.strip_prefix('[')?;
    let close = rest.find(']')?;
    Some(Group {
        content: &rest[..close],
        len: close + 2,
    })
}

/// Length in bytes of the leading whitespace of `text`.
pub fn leading_whitespace(text: &str) -> usize {
    text.len() - text.trim_start().len()
}
