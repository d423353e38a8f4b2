use anyhow::Result;

/// A stateless conversion from `I` to `O`.
///
/// Output stages are transforms over whole samples, and views accept payload
/// transforms for `x` and `y`.
pub trait Transform<I, O>: Send + Sync {
    fn apply(&self, input: I) -> Result<O>;
}

/// Wraps a closure as a [`Transform`].
pub struct FnTransform<F>(pub F);

impl<I, O, F> Transform<I, O> for FnTransform<F>
where
    F: Fn(I) -> Result<O> + Send + Sync,
{
    fn apply(&self, input: I) -> Result<O> {
        (self.0)(input)
    }
}

/// Passes its input through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl<T> Transform<T, T> for Identity {
    fn apply(&self, input: T) -> Result<T> {
        Ok(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn closures_and_identity_apply() -> Result<()> {
        let double = FnTransform(|x: i64| -> Result<i64> { Ok(x * 2) });
        assert_eq!(double.apply(21)?, 42);

        let id: &dyn Transform<i64, i64> = &Identity;
        assert_eq!(id.apply(5)?, 5);
        Ok(())
    }

    #[test]
    fn closure_errors_propagate() {
        let fail = FnTransform(|_: i64| -> Result<i64> { Err(anyhow!("boom")) });
        assert_eq!(fail.apply(0).unwrap_err().to_string(), "boom");
    }
}
