//! Optional hooks run on decoded input and on produced output.
//!
//! `#[api_dto]` emits empty impls for both traits, so a DTO only writes the
//! hook it actually needs (and drops the generated one with
//! `#[api_dto(in_transform)]` / `#[api_dto(out_transform)]`).
//!
//! `Vec<T>` bodies and replies run the hook on every item; see
//! [`RequestBody`](crate::RequestBody) and [`Reply`](crate::Reply).

use crate::context::RequestContext;
use crate::error::Error;

/// Runs after the body is decoded and before the controller is called.
///
/// The value may be normalized in place; an error rejects the request and the
/// controller never runs.
pub trait InTransform {
    fn in_transform(&mut self, _ctx: &RequestContext) -> Result<(), Error> {
        Ok(())
    }
}

/// Runs after the controller returns and before the value is serialized.
pub trait OutTransform {
    fn out_transform(&mut self, _ctx: &RequestContext) -> Result<(), Error> {
        Ok(())
    }
}

macro_rules! no_transform {
    ($($ty:ty),* $(,)?) => {
        $(
            impl InTransform for $ty {}
            impl OutTransform for $ty {}
        )*
    };
}

no_transform!(bool, i8, i16, i32, i64, u8, u16, u32, u64, isize, usize, f32, f64);

// String has a dedicated text reply, so only the input side is implemented.
impl InTransform for String {}

impl<T: InTransform> InTransform for Option<T> {
    fn in_transform(&mut self, ctx: &RequestContext) -> Result<(), Error> {
        match self {
            Some(inner) => inner.in_transform(ctx),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;

    struct Unit(String);

    impl InTransform for Unit {
        fn in_transform(&mut self, _ctx: &RequestContext) -> Result<(), Error> {
            self.0 = self.0.to_lowercase();
            if self.0 == "bad" {
                return Err(ValidationError::field("unit", "invalid unit").into());
            }
            Ok(())
        }
    }

    #[test]
    fn present_optional_input_is_transformed() {
        let ctx = RequestContext::for_tests();
        let mut unit = Some(Unit("KG".into()));
        unit.in_transform(&ctx).unwrap();
        assert_eq!(unit.map(|u| u.0).as_deref(), Some("kg"));

        let mut rejected = Some(Unit("BAD".into()));
        assert!(matches!(rejected.in_transform(&ctx), Err(Error::Validation(_))));
    }

    #[test]
    fn missing_optional_input_is_accepted() {
        let ctx = RequestContext::for_tests();
        let mut nothing: Option<Unit> = None;
        assert!(nothing.in_transform(&ctx).is_ok());
    }
}
