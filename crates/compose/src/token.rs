//! Token estimation utilities.
//!
//! Character heuristic: ~4 characters per token, rounded up. Used for the
//! static-prefix token count and for usage when no upstream count exists.

use warmprompt_core::message::MessageBlock;

/// Per-block overhead for role name and delimiters on the wire.
pub const BLOCK_OVERHEAD: usize = 4;

/// Estimate the token count for a string.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    text.len().div_ceil(4)
}

/// Estimate tokens for one block including its overhead.
pub fn estimate_block_tokens(block: &MessageBlock) -> usize {
    BLOCK_OVERHEAD + estimate_tokens(&block.content)
}

pub fn estimate_blocks_tokens(blocks: &[MessageBlock]) -> usize {
    blocks.iter().map(estimate_block_tokens).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn rounds_up() {
        assert_eq!(estimate_tokens("test"), 1);
        assert_eq!(estimate_tokens("hello"), 2);
        assert_eq!(estimate_tokens(&"a".repeat(100)), 25);
    }

    #[test]
    fn block_includes_overhead() {
        let block = MessageBlock::user_query("test");
        assert_eq!(estimate_block_tokens(&block), 5);
    }

    #[test]
    fn multiple_blocks() {
        let blocks = vec![
            MessageBlock::cached_system("hello"),
            MessageBlock::user_query("world"),
        ];
        assert_eq!(estimate_blocks_tokens(&blocks), 12);
    }
}
