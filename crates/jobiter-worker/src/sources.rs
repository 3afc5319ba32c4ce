//! Ready-made sequence sources for in-memory collections.
//!
//! All builders use the same cursor convention: the cursor of an item is its
//! zero-based position, and resuming from cursor `c` yields the items after
//! position `c`.

use jobiter_core::{BoxError, Cursor};

use crate::job::Sequence;

/// Iterate the elements of `items`.
pub fn array<T>(items: Vec<T>, cursor: Option<&Cursor>) -> Result<Sequence<'static, T>, BoxError>
where
    T: Send + 'static,
{
    let start = start_index(cursor)?;
    Ok(Box::new(
        items
            .into_iter()
            .enumerate()
            .skip(start)
            .map(|(index, item)| Ok::<_, BoxError>((item, Cursor::from(index)))),
    ))
}

/// Iterate the integers `0..count`.
pub fn times(count: u64, cursor: Option<&Cursor>) -> Result<Sequence<'static, u64>, BoxError> {
    let start = start_index(cursor)? as u64;
    Ok(Box::new(
        (start..count).map(|n| Ok::<_, BoxError>((n, Cursor::Int(n as i64)))),
    ))
}

/// Iterate `items` in chunks of `batch_size`; the cursor is the batch position.
pub fn batches<T>(
    items: Vec<T>,
    batch_size: usize,
    cursor: Option<&Cursor>,
) -> Result<Sequence<'static, Vec<T>>, BoxError>
where
    T: Send + 'static,
{
    if batch_size == 0 {
        return Err("batch size must be positive".into());
    }
    let start = start_index(cursor)?;

    let mut chunks: Vec<Vec<T>> = Vec::new();
    let mut current = Vec::with_capacity(batch_size);
    for item in items {
        current.push(item);
        if current.len() == batch_size {
            chunks.push(std::mem::replace(&mut current, Vec::with_capacity(batch_size)));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    let sequence = array(chunks, None)?;
    Ok(Box::new(sequence.skip(start)))
}

/// First position to yield when resuming from `cursor`.
fn start_index(cursor: Option<&Cursor>) -> Result<usize, BoxError> {
    match cursor {
        None => Ok(0),
        Some(Cursor::Int(last)) if *last >= 0 => Ok(*last as usize + 1),
        Some(other) => Err(format!(
            "expected a non-negative integer cursor, got {} {}",
            other.type_name(),
            other
        )
        .into()),
    }
}
