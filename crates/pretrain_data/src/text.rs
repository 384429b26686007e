//! Truncation and padding for dialogue/pretraining text.
//!
//! Lengths here count characters for strings and elements for token slices;
//! no tokenizer is involved.

/// Keeps at most `max_num_tokens` characters of `document`: the leading ones,
/// or the trailing ones when `reverse` is set.
///
/// ```
/// use pretrain_data::text::truncate_sequence;
/// assert_eq!(truncate_sequence("abcdef", 3, false), "abc");
/// assert_eq!(truncate_sequence("abcdef", 3, true), "def");
/// assert_eq!(truncate_sequence("abc", 10, false), "abc");
/// ```
pub fn truncate_sequence(document: &str, max_num_tokens: usize, reverse: bool) -> &str {
    let total = document.chars().count();
    if total <= max_num_tokens {
        return document;
    }

    if reverse {
        let start = document
            .char_indices()
            .nth(total - max_num_tokens)
            .map(|(byte, _)| byte)
            .unwrap_or(document.len());
        &document[start..]
    } else {
        let end = document
            .char_indices()
            .nth(max_num_tokens)
            .map(|(byte, _)| byte)
            .unwrap_or(document.len());
        &document[..end]
    }
}

/// Slice counterpart of [`truncate_sequence`] for token ids.
pub fn truncate_tokens<T>(tokens: &[T], max_num_tokens: usize, reverse: bool) -> &[T] {
    if tokens.len() <= max_num_tokens {
        tokens
    } else if reverse {
        &tokens[tokens.len() - max_num_tokens..]
    } else {
        &tokens[..max_num_tokens]
    }
}

/// Right-pads `ids` with `pad_id` up to `max_length` and returns the padded
/// ids together with their attention mask (`1` for real tokens, `0` for pads).
///
/// Inputs already at or above `max_length` come back unchanged with an
/// all-ones mask; truncate first when a hard limit is needed.
///
/// ```
/// use pretrain_data::text::padding_to_maxlength;
/// let (ids, mask) = padding_to_maxlength(&[1, 2, 3], 5, 0);
/// assert_eq!(ids, vec![1, 2, 3, 0, 0]);
/// assert_eq!(mask, vec![1, 1, 1, 0, 0]);
/// ```
pub fn padding_to_maxlength<T: Clone>(ids: &[T], max_length: usize, pad_id: T) -> (Vec<T>, Vec<i64>) {
    let pad = max_length.saturating_sub(ids.len());

    let mut padded = Vec::with_capacity(ids.len() + pad);
    padded.extend_from_slice(ids);
    padded.resize(ids.len() + pad, pad_id);

    let mut mask = vec![1i64; ids.len()];
    mask.resize(ids.len() + pad, 0);
    (padded, mask)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_leading_or_trailing_characters() {
        assert_eq!(truncate_sequence("abcdef", 3, false), "abc");
        assert_eq!(truncate_sequence("abcdef", 3, true), "def");
        assert_eq!(truncate_sequence("abcdef", 6, true), "abcdef");
        assert_eq!(truncate_sequence("abcdef", 0, false), "");
        assert_eq!(truncate_sequence("abcdef", 0, true), "");
    }

    #[test]
    fn counts_characters_not_bytes() {
        let dialogue = "你好世界呀";
        assert_eq!(truncate_sequence(dialogue, 2, false), "你好");
        assert_eq!(truncate_sequence(dialogue, 2, true), "界呀");
        assert_eq!(truncate_sequence(dialogue, 5, false), dialogue);
    }

    #[test]
    fn truncates_token_slices() {
        let tokens = [101, 7, 8, 9, 102];
        assert_eq!(truncate_tokens(&tokens, 3, false), &[101, 7, 8]);
        assert_eq!(truncate_tokens(&tokens, 3, true), &[8, 9, 102]);
        assert_eq!(truncate_tokens(&tokens, 9, true), &tokens);
    }

    #[test]
    fn pads_and_masks() {
        assert_eq!(
            padding_to_maxlength(&[1, 2, 3], 5, 0),
            (vec![1, 2, 3, 0, 0], vec![1, 1, 1, 0, 0])
        );
        assert_eq!(padding_to_maxlength::<i64>(&[], 2, -1), (vec![-1, -1], vec![0, 0]));
    }

    #[test]
    fn longer_inputs_are_left_alone() {
        assert_eq!(
            padding_to_maxlength(&[4, 5, 6], 2, 0),
            (vec![4, 5, 6], vec![1, 1, 1])
        );
    }
}
