use brasa::{api_dto, Error, InTransform, OutTransform, RequestContext, ValidationError};

#[api_dto]
pub struct Greeting {
    pub message: String,
}

/// An amount of an ingredient. Units are normalized to lower case on input.
#[api_dto(in_transform)]
pub struct Dosing {
    pub quantity: f64,
    pub unit: String,
}

/// The unit of a dosing with no measurable amount ("a pinch", "to taste").
pub const NO_UNIT: &str = "none";

const UNITS: [(&str, &str, f64); 7] = [
    ("g", "g", 1.0),
    ("kg", "g", 1000.0),
    ("mg", "g", 0.001),
    ("ml", "ml", 1.0),
    ("l", "ml", 1000.0),
    ("unit", "unit", 1.0),
    (NO_UNIT, NO_UNIT, 1.0),
];

impl Dosing {
    /// Same amount in grams, millilitres or units.
    pub fn to_base_unit(&self) -> Dosing {
        match UNITS.iter().find(|(unit, _, _)| *unit == self.unit) {
            Some((_, base, factor)) => Dosing {
                quantity: self.quantity * factor,
                unit: base.to_string(),
            },
            None => self.clone(),
        }
    }

    /// Lower-cases the unit, then checks unit and quantity together.
    pub fn validate(&mut self) -> Result<(), Error> {
        self.unit = self.unit.trim().to_lowercase();
        let mut err = ValidationError::new("invalid dosing");
        if !UNITS.iter().any(|(unit, _, _)| *unit == self.unit) {
            err = err.with_field("unit", format!("unknown unit `{}`", self.unit));
        }
        // 0 只允许用于 "none"
        let allowed_zero = self.unit == NO_UNIT && self.quantity == 0.0;
        if self.quantity.is_nan() || (self.quantity <= 0.0 && !allowed_zero) {
            err = err.with_field("quantity", "must be positive");
        }
        if err.details.is_empty() {
            Ok(())
        } else {
            Err(err.into())
        }
    }
}

impl InTransform for Dosing {
    fn in_transform(&mut self, _ctx: &RequestContext) -> Result<(), Error> {
        self.validate()
    }
}

#[api_dto(in_transform)]
pub struct NewIngredient {
    pub name: String,
    pub dosing: Dosing,
    pub supplier: Option<String>,
}

impl InTransform for NewIngredient {
    fn in_transform(&mut self, ctx: &RequestContext) -> Result<(), Error> {
        self.name = self.name.trim().to_string();
        if self.name.is_empty() {
            return Err(ValidationError::field("name", "must not be empty").into());
        }
        self.dosing.in_transform(ctx)
    }
}

/// A stored ingredient. Suppliers are only shown to signed-in users.
#[api_dto(out_transform)]
pub struct Ingredient {
    pub id: u64,
    pub name: String,
    pub dosing: Dosing,
    pub supplier: Option<String>,
}

impl OutTransform for Ingredient {
    fn out_transform(&mut self, ctx: &RequestContext) -> Result<(), Error> {
        if ctx.claims().is_none() {
            self.supplier = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_units() {
        let kg = Dosing { quantity: 1.5, unit: "kg".into() };
        let base = kg.to_base_unit();
        assert_eq!(base.unit, "g");
        assert_eq!(base.quantity, 1500.0);

        let egg = Dosing { quantity: 2.0, unit: "unit".into() };
        assert_eq!(egg.to_base_unit().quantity, 2.0);
    }

    #[test]
    fn zero_is_only_valid_without_unit() {
        let check = |quantity: f64, unit: &str| {
            let mut dosing = Dosing { quantity, unit: unit.into() };
            let valid = dosing.validate().is_ok();
            (valid, dosing.unit)
        };
        assert_eq!(check(0.0, "none"), (true, "none".to_string()));
        assert_eq!(check(0.0, "KG"), (false, "kg".to_string()));
        assert_eq!(check(2.0, "KG"), (true, "kg".to_string()));
    }
}
