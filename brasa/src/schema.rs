//! Reflection of handler input/output types into OpenAPI schema nodes.
//!
//! Named types become `#/components/schemas/<Name>` entries and are shared
//! between every route that mentions them; primitives and arrays are inlined,
//! with array items pointing at the element's component.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use utoipa::openapi::schema::{ArrayBuilder, ArrayItems, SchemaType, Type};
use utoipa::openapi::{Ref, RefOr, Schema};
use utoipa::ToSchema;

const MAX_DEPTH: usize = 32;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("schema `{0}` is already registered with a different shape")]
    Conflict(String),
    #[error("schema references `{0}` which is not registered")]
    UnresolvedReference(String),
}

/// De-duplicating store of component schemas, keyed by canonical type name.
#[derive(Debug, Default, Clone)]
pub struct SchemaRegistry {
    components: BTreeMap<String, RefOr<Schema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` and everything it mentions, returning the node to embed
    /// in an operation (a `$ref` for named types, the schema itself otherwise).
    pub fn register<T: ToSchema>(&mut self) -> Result<RefOr<Schema>, SchemaError> {
        let mut nested = Vec::new();
        T::schemas(&mut nested);
        let mut added = Vec::new();
        for (name, schema) in nested {
            if self.insert(name.clone(), schema)? {
                added.push(name);
            }
        }

        let schema = T::schema();
        let node = if is_inline(&schema) {
            schema
        } else {
            let name = T::name().into_owned();
            if self.insert(name.clone(), schema)? {
                added.push(name.clone());
            }
            RefOr::Ref(Ref::from_schema_name(name))
        };

        for name in added.iter().filter(|name| self.is_recursive(name)) {
            tracing::warn!(schema = %name, "recursive schema: it refers back to itself through `$ref`");
        }

        let mut missing = Vec::new();
        collect_refs(&node, &mut missing);
        for schema in self.components.values() {
            collect_refs(schema, &mut missing);
        }
        match missing.into_iter().find(|name| !self.components.contains_key(name)) {
            Some(name) => Err(SchemaError::UnresolvedReference(name)),
            None => Ok(node),
        }
    }

    /// `Vec<T>`: an array whose items are `T`'s node, so a named element is
    /// shared as a component instead of being inlined.
    pub fn register_array<T: ToSchema>(&mut self) -> Result<RefOr<Schema>, SchemaError> {
        let items = self.register::<T>()?;
        Ok(RefOr::T(Schema::Array(ArrayBuilder::new().items(items).build())))
    }

    /// Returns whether `name` was new.
    fn insert(&mut self, name: String, schema: RefOr<Schema>) -> Result<bool, SchemaError> {
        match self.components.get(&name) {
            None => {
                self.components.insert(name, schema);
                Ok(true)
            }
            Some(existing) if same_shape(existing, &schema) => Ok(false),
            Some(_) => Err(SchemaError::Conflict(name)),
        }
    }

    /// Whether following `$ref`s from component `name` leads back to it.
    pub fn is_recursive(&self, name: &str) -> bool {
        let mut seen = BTreeSet::new();
        let mut pending = vec![name.to_string()];
        while let Some(current) = pending.pop() {
            let Some(schema) = self.components.get(&current) else {
                continue;
            };
            let mut refs = Vec::new();
            collect_refs(schema, &mut refs);
            for reference in refs {
                if reference == name {
                    return true;
                }
                if seen.insert(reference.clone()) {
                    pending.push(reference);
                }
            }
        }
        false
    }

    pub fn get(&self, name: &str) -> Option<&RefOr<Schema>> {
        self.components.get(name)
    }

    pub fn components(&self) -> &BTreeMap<String, RefOr<Schema>> {
        &self.components
    }

    /// Freezes the current components together with `root` so request-time
    /// checks can resolve references without touching the registry again.
    pub(crate) fn shape(&self, root: RefOr<Schema>) -> BodyShape {
        BodyShape {
            root,
            components: Arc::new(self.components.clone()),
        }
    }
}

fn same_shape(a: &RefOr<Schema>, b: &RefOr<Schema>) -> bool {
    match (serde_json::to_value(a), serde_json::to_value(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn is_inline(schema: &RefOr<Schema>) -> bool {
    match schema {
        RefOr::Ref(_) => true,
        RefOr::T(Schema::Array(_)) => true,
        RefOr::T(Schema::Object(obj)) => {
            obj.properties.is_empty()
                && obj.additional_properties.is_none()
                && !matches!(obj.schema_type, SchemaType::Type(Type::Object))
        }
        RefOr::T(_) => false,
    }
}

fn ref_name(reference: &Ref) -> &str {
    reference
        .ref_location
        .rsplit('/')
        .next()
        .unwrap_or(reference.ref_location.as_str())
}

fn collect_refs(schema: &RefOr<Schema>, out: &mut Vec<String>) {
    match schema {
        RefOr::Ref(reference) => out.push(ref_name(reference).to_string()),
        RefOr::T(Schema::Object(obj)) => {
            for prop in obj.properties.values() {
                collect_refs(prop, out);
            }
        }
        RefOr::T(Schema::Array(arr)) => {
            if let ArrayItems::RefOrSchema(items) = &arr.items {
                collect_refs(items, out);
            }
        }
        RefOr::T(Schema::AllOf(all)) => all.items.iter().for_each(|s| collect_refs(s, out)),
        RefOr::T(Schema::OneOf(one)) => one.items.iter().for_each(|s| collect_refs(s, out)),
        RefOr::T(Schema::AnyOf(any)) => any.items.iter().for_each(|s| collect_refs(s, out)),
        RefOr::T(_) => {}
    }
}

/// The declared shape of a request body, used to reject fields the target
/// type does not know about.
#[derive(Debug, Clone)]
pub(crate) struct BodyShape {
    root: RefOr<Schema>,
    components: Arc<BTreeMap<String, RefOr<Schema>>>,
}

impl BodyShape {
    /// Returns the dotted paths of every field in `value` the shape does not declare.
    pub(crate) fn unknown_fields(&self, value: &Value) -> Vec<String> {
        let mut found = Vec::new();
        self.walk(value, &self.root, "", 0, &mut found);
        found
    }

    fn resolve<'a>(&'a self, mut schema: &'a RefOr<Schema>) -> Option<&'a Schema> {
        for _ in 0..MAX_DEPTH {
            match schema {
                RefOr::T(inner) => return Some(inner),
                RefOr::Ref(reference) => schema = self.components.get(ref_name(reference))?,
            }
        }
        None
    }

    fn walk(&self, value: &Value, schema: &RefOr<Schema>, path: &str, depth: usize, found: &mut Vec<String>) {
        if depth > MAX_DEPTH {
            return;
        }
        let Some(schema) = self.resolve(schema) else {
            return;
        };
        match (schema, value) {
            (Schema::Object(obj), Value::Object(map)) => {
                // 无声明属性或允许额外属性时不做检查
                if obj.properties.is_empty() || obj.additional_properties.is_some() {
                    return;
                }
                for (key, field) in map {
                    let field_path = join(path, key);
                    match obj.properties.get(key) {
                        Some(prop) => self.walk(field, prop, &field_path, depth + 1, found),
                        None => found.push(field_path),
                    }
                }
            }
            (Schema::Array(arr), Value::Array(items)) => {
                if let ArrayItems::RefOrSchema(item_schema) = &arr.items {
                    for (idx, item) in items.iter().enumerate() {
                        let item_path = format!("{path}[{idx}]");
                        self.walk(item, item_schema, &item_path, depth + 1, found);
                    }
                }
            }
            (Schema::AllOf(all), Value::Object(map)) => {
                let mut declared: BTreeMap<&str, &RefOr<Schema>> = BTreeMap::new();
                for part in &all.items {
                    match self.resolve(part) {
                        Some(Schema::Object(obj)) if obj.additional_properties.is_none() => {
                            for (name, prop) in &obj.properties {
                                declared.insert(name.as_str(), prop);
                            }
                        }
                        // 任一部分无法静态确定字段集合时放行
                        _ => return,
                    }
                }
                for (key, field) in map {
                    let field_path = join(path, key);
                    match declared.get(key.as_str()) {
                        Some(prop) => self.walk(field, prop, &field_path, depth + 1, found),
                        None => found.push(field_path),
                    }
                }
            }
            (Schema::OneOf(one), _) => self.walk_variants(value, &one.items, path, depth, found),
            (Schema::AnyOf(any), _) => self.walk_variants(value, &any.items, path, depth, found),
            _ => {}
        }
    }

    /// A value matching several variants is accepted if any candidate is clean;
    /// otherwise the closest candidate's complaints are reported.
    fn walk_variants(&self, value: &Value, variants: &[RefOr<Schema>], path: &str, depth: usize, found: &mut Vec<String>) {
        let mut best: Option<Vec<String>> = None;
        for variant in variants {
            let Some(resolved) = self.resolve(variant) else {
                return;
            };
            if !admits(resolved, value) {
                continue;
            }
            let mut local = Vec::new();
            self.walk(value, variant, path, depth + 1, &mut local);
            if local.is_empty() {
                return;
            }
            if best.as_ref().map_or(true, |b| local.len() < b.len()) {
                best = Some(local);
            }
        }
        if let Some(best) = best {
            found.extend(best);
        }
    }
}

fn admits(schema: &Schema, value: &Value) -> bool {
    let Schema::Object(obj) = schema else {
        return !matches!(schema, Schema::Array(_)) || value.is_array();
    };
    let kind = match value {
        Value::Null => Type::Null,
        Value::Bool(_) => Type::Boolean,
        Value::Number(n) if n.is_f64() => Type::Number,
        Value::Number(_) => Type::Integer,
        Value::String(_) => Type::String,
        Value::Array(_) => Type::Array,
        Value::Object(_) => Type::Object,
    };
    let matches = |declared: &Type| *declared == kind || (*declared == Type::Number && kind == Type::Integer);
    match &obj.schema_type {
        SchemaType::Type(declared) => matches(declared),
        SchemaType::Array(declared) => declared.iter().any(matches),
        _ => true,
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[allow(dead_code)]
    #[derive(Serialize, Deserialize, ToSchema)]
    struct Dosing {
        quantity: f64,
        unit: String,
    }

    #[allow(dead_code)]
    #[derive(Serialize, Deserialize, ToSchema)]
    struct Recipe {
        name: String,
        dosing: Dosing,
        steps: Vec<Step>,
    }

    #[allow(dead_code)]
    #[derive(Serialize, Deserialize, ToSchema)]
    struct Step {
        text: String,
    }

    #[test]
    fn named_types_become_shared_components() {
        let mut registry = SchemaRegistry::new();
        let first = registry.register::<Recipe>().unwrap();
        let second = registry.register::<Recipe>().unwrap();

        assert!(matches!(first, RefOr::Ref(_)));
        assert_eq!(serde_json::to_value(&first).unwrap(), serde_json::to_value(&second).unwrap());
        assert!(registry.get("Recipe").is_some());
        assert!(registry.get("Dosing").is_some());
        assert!(registry.get("Step").is_some());
    }

    #[test]
    fn primitives_are_inlined() {
        let mut registry = SchemaRegistry::new();
        let node = registry.register::<String>().unwrap();
        assert!(matches!(node, RefOr::T(Schema::Object(_))));
        assert!(registry.components().is_empty());
    }

    mod other {
        use super::*;

        #[allow(dead_code)]
        #[derive(Serialize, Deserialize, ToSchema)]
        pub struct Dosing {
            pub grams: i64,
        }
    }

    #[test]
    fn same_name_with_different_shape_is_a_conflict() {
        let mut registry = SchemaRegistry::new();
        registry.register::<Dosing>().unwrap();
        let err = registry.register::<other::Dosing>().unwrap_err();
        assert_eq!(err, SchemaError::Conflict("Dosing".into()));
    }

    #[allow(dead_code)]
    #[derive(Serialize, Deserialize, ToSchema)]
    struct Category {
        name: String,
        #[schema(no_recursion)]
        children: Vec<Category>,
    }

    #[test]
    fn array_items_point_at_the_element_component() {
        let mut registry = SchemaRegistry::new();
        let node = registry.register_array::<Step>().unwrap();
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["type"], "array");
        assert_eq!(json["items"]["$ref"], "#/components/schemas/Step");
        assert!(registry.get("Step").is_some());

        let numbers = serde_json::to_value(registry.register_array::<i64>().unwrap()).unwrap();
        assert_eq!(numbers["items"]["type"], "integer");
    }

    #[test]
    fn self_referencing_types_are_registered_and_flagged() {
        let mut registry = SchemaRegistry::new();
        let root = registry.register::<Category>().unwrap();
        assert!(registry.is_recursive("Category"));
        assert!(!registry.is_recursive("Step"));

        let shape = registry.shape(root);
        let tree = json!({"name": "spices", "children": [{"name": "pepper", "children": [], "hot": true}]});
        assert_eq!(shape.unknown_fields(&tree), vec!["children[0].hot"]);
    }

    #[test]
    fn unknown_fields_are_found_at_any_depth() {
        let mut registry = SchemaRegistry::new();
        let root = registry.register::<Recipe>().unwrap();
        let shape = registry.shape(root);

        let clean = json!({"name": "bread", "dosing": {"quantity": 1.0, "unit": "kg"}, "steps": [{"text": "knead"}]});
        assert!(shape.unknown_fields(&clean).is_empty());

        let dirty = json!({
            "name": "bread",
            "color": "brown",
            "dosing": {"quantity": 1.0, "unit": "kg", "brand": "x"},
            "steps": [{"text": "knead", "time": 3}]
        });
        let mut found = shape.unknown_fields(&dirty);
        found.sort();
        assert_eq!(found, vec!["color", "dosing.brand", "steps[0].time"]);
    }
}
