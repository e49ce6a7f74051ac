//! Type-erased values flowing between nodes.
//!
//! A node's result is stored as a shared `Any` so one node can be read by its
//! successor and by any join that names it as a source. The typed layer in
//! [`crate::queue::Dispatch`] downcasts back with the arity-specific helpers
//! below; a mismatch there is an engine bug, not a user error.

use std::any::Any;
use std::sync::Arc;

/// An erased node result.
pub type Value = Arc<dyn Any + Send + Sync>;

/// Bound required of every value a pipeline produces.
pub trait DispatchValue: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> DispatchValue for T {}

/// Erased work: merged source values in, result out.
pub(crate) type Work = Arc<dyn Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync>;

/// Erased per-node error handler producing a substitute result.
pub(crate) type ErrorHandler = Arc<dyn Fn(&anyhow::Error) -> anyhow::Result<Value> + Send + Sync>;

/// Erase a work closure.
pub(crate) fn work_fn<F>(f: F) -> Work
where
    F: Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub(crate) fn handler_fn<F>(f: F) -> ErrorHandler
where
    F: Fn(&anyhow::Error) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub(crate) fn wrap<T: DispatchValue>(value: T) -> Value {
    Arc::new(value)
}

pub(crate) fn unit() -> Value {
    Arc::new(())
}

fn downcast<T: DispatchValue>(value: &Value) -> anyhow::Result<T> {
    value.downcast_ref::<T>().cloned().ok_or_else(|| {
        anyhow::anyhow!(
            "source value is not a {}",
            std::any::type_name::<T>()
        )
    })
}

fn expect_arity(values: &[Value], arity: usize) -> anyhow::Result<()> {
    if values.len() != arity {
        anyhow::bail!("expected {} source values, got {}", arity, values.len());
    }
    Ok(())
}

pub(crate) fn merge1<A: DispatchValue>(values: &[Value]) -> anyhow::Result<A> {
    expect_arity(values, 1)?;
    downcast(&values[0])
}

pub(crate) fn merge2<A: DispatchValue, B: DispatchValue>(
    values: &[Value],
) -> anyhow::Result<(A, B)> {
    expect_arity(values, 2)?;
    Ok((downcast(&values[0])?, downcast(&values[1])?))
}

pub(crate) fn merge3<A: DispatchValue, B: DispatchValue, C: DispatchValue>(
    values: &[Value],
) -> anyhow::Result<(A, B, C)> {
    expect_arity(values, 3)?;
    Ok((
        downcast(&values[0])?,
        downcast(&values[1])?,
        downcast(&values[2])?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_pair_in_order() {
        let values = vec![wrap(1_i32), wrap("x".to_string())];
        let (a, b): (i32, String) = merge2(&values).unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, "x");
    }

    #[test]
    fn test_merge_rejects_wrong_type() {
        let values = vec![wrap(1_u8)];
        assert!(merge1::<String>(&values).is_err());
    }

    #[test]
    fn test_merge_rejects_wrong_arity() {
        let values = vec![wrap(1_i32), wrap(2_i32)];
        assert!(merge3::<i32, i32, i32>(&values).is_err());
    }
}
