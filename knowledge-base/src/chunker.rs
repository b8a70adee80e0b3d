//! Fixed-size contiguous partitioning of the corpus.

use crate::error::PipelineError;

/// Split `items` into contiguous slices of `chunk_size`; the last may be shorter.
pub fn chunk<T>(items: &[T], chunk_size: usize) -> Result<Vec<&[T]>, PipelineError> {
    if chunk_size == 0 {
        return Err(PipelineError::InvalidSettings(
            "chunk size must be greater than zero".to_string(),
        ));
    }
    Ok(items.chunks(chunk_size).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunks_reconstruct_input() {
        for len in 0..40usize {
            let items: Vec<usize> = (0..len).collect();
            for size in 1..12usize {
                let chunks = chunk(&items, size).unwrap();

                assert_eq!(chunks.concat(), items);
                assert_eq!(chunks.len(), (len + size - 1) / size);
                if let Some((last, full)) = chunks.split_last() {
                    assert!(full.iter().all(|c| c.len() == size));
                    assert!(!last.is_empty() && last.len() <= size);
                }
            }
        }
    }

    #[test]
    fn test_zero_chunk_size_is_rejected() {
        assert!(matches!(
            chunk(&[1, 2, 3], 0),
            Err(PipelineError::InvalidSettings(_))
        ));
    }
}
