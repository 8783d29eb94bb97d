//! Product catalog model.
//! Every translatable piece of a product is a `Localized` map (language → text).
//! Products expose their fields through a small sum type of shapes so a single
//! "translate-if-missing" rule covers names, attribute maps and characteristic lists.

pub mod store;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Language code → text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Localized(BTreeMap<String, String>);

impl Localized {
    pub fn get(&self, lang: &str) -> Option<&str> {
        self.0.get(lang).map(String::as_str)
    }

    /// Non-empty text for `lang`, if any.
    pub fn text(&self, lang: &str) -> Option<&str> {
        self.get(lang).filter(|t| !t.trim().is_empty())
    }

    pub fn has(&self, lang: &str) -> bool {
        self.text(lang).is_some()
    }

    pub fn set(&mut self, lang: impl Into<String>, text: impl Into<String>) {
        self.0.insert(lang.into(), text.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn languages(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Localized {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Attribute {
    pub label: Localized,
    pub value: Localized,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Characteristic {
    pub name: Localized,
    pub value: Localized,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// SKU or database id, string or number as exported.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub code: Value,
    #[serde(default, skip_serializing_if = "Localized::is_empty")]
    pub name: Localized,
    #[serde(default, skip_serializing_if = "Localized::is_empty")]
    pub description: Localized,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Attribute>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub characteristics: Vec<Characteristic>,
    /// Price, images, category ids... carried through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Location of one translatable text inside a product.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldPath {
    Name,
    Description,
    AttributeLabel(String),
    AttributeValue(String),
    CharacteristicName(usize),
    CharacteristicValue(usize),
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldPath::Name => write!(f, "name"),
            FieldPath::Description => write!(f, "description"),
            FieldPath::AttributeLabel(key) => write!(f, "attributes.{key}.label"),
            FieldPath::AttributeValue(key) => write!(f, "attributes.{key}.value"),
            FieldPath::CharacteristicName(i) => write!(f, "characteristics[{i}].name"),
            FieldPath::CharacteristicValue(i) => write!(f, "characteristics[{i}].value"),
        }
    }
}

/// The shapes of translatable data a product carries.
pub enum FieldShape<'a> {
    Text(FieldPath, &'a Localized),
    Attributes(&'a BTreeMap<String, Attribute>),
    Characteristics(&'a [Characteristic]),
}

impl<'a> FieldShape<'a> {
    /// Visit every text reachable from this shape, in document order.
    pub fn walk<F>(self, visit: &mut F)
    where
        F: FnMut(FieldPath, &'a Localized),
    {
        match self {
            FieldShape::Text(path, text) => visit(path, text),
            FieldShape::Attributes(map) => {
                for (key, attr) in map {
                    FieldShape::Text(FieldPath::AttributeLabel(key.clone()), &attr.label).walk(visit);
                    FieldShape::Text(FieldPath::AttributeValue(key.clone()), &attr.value).walk(visit);
                }
            }
            FieldShape::Characteristics(list) => {
                for (i, ch) in list.iter().enumerate() {
                    FieldShape::Text(FieldPath::CharacteristicName(i), &ch.name).walk(visit);
                    FieldShape::Text(FieldPath::CharacteristicValue(i), &ch.value).walk(visit);
                }
            }
        }
    }
}

/// A field that needs a translation for the current language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingField {
    pub path: FieldPath,
    pub source_text: String,
}

impl Product {
    pub fn shapes(&self) -> [FieldShape<'_>; 4] {
        [
            FieldShape::Text(FieldPath::Name, &self.name),
            FieldShape::Text(FieldPath::Description, &self.description),
            FieldShape::Attributes(&self.attributes),
            FieldShape::Characteristics(&self.characteristics),
        ]
    }

    pub fn visit_texts<'a, F>(&'a self, mut visit: F)
    where
        F: FnMut(FieldPath, &'a Localized),
    {
        for shape in self.shapes() {
            shape.walk(&mut visit);
        }
    }

    pub fn field_mut(&mut self, path: &FieldPath) -> Option<&mut Localized> {
        match path {
            FieldPath::Name => Some(&mut self.name),
            FieldPath::Description => Some(&mut self.description),
            FieldPath::AttributeLabel(key) => self.attributes.get_mut(key).map(|a| &mut a.label),
            FieldPath::AttributeValue(key) => self.attributes.get_mut(key).map(|a| &mut a.value),
            FieldPath::CharacteristicName(i) => self.characteristics.get_mut(*i).map(|c| &mut c.name),
            FieldPath::CharacteristicValue(i) => {
                self.characteristics.get_mut(*i).map(|c| &mut c.value)
            }
        }
    }

    /// Fields to send for `target`. A field qualifies when it has source text
    /// and either `force` is set or it has no text for `target` yet.
    pub fn pending_fields(&self, source: &str, target: &str, force: bool) -> Vec<PendingField> {
        let mut pending = Vec::new();
        self.visit_texts(|path, text| {
            let Some(source_text) = text.text(source) else {
                return;
            };
            if force || !text.has(target) {
                pending.push(PendingField {
                    path,
                    source_text: source_text.to_string(),
                });
            }
        });
        pending
    }

    pub fn is_translated(&self, source: &str, target: &str) -> bool {
        self.pending_fields(source, target, false).is_empty()
    }

    pub fn code_str(&self) -> String {
        match &self.code {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    /// Name for display: source language first, then anything non-empty.
    pub fn display_name(&self, source: &str) -> String {
        self.name
            .text(source)
            .or_else(|| self.name.languages().find_map(|l| self.name.text(l)))
            .unwrap_or_default()
            .to_string()
    }
}

/// A full catalog. Accepts either a bare product array or an object with a
/// `products` array plus metadata; writes back the shape it was read in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "CatalogRepr", into = "CatalogRepr")]
pub struct Catalog {
    pub products: Vec<Product>,
    /// `None` for the bare-array shape.
    pub meta: Option<Map<String, Value>>,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum CatalogRepr {
    Bare(Vec<Product>),
    Wrapped {
        products: Vec<Product>,
        #[serde(flatten)]
        meta: Map<String, Value>,
    },
}

impl From<CatalogRepr> for Catalog {
    fn from(repr: CatalogRepr) -> Self {
        match repr {
            CatalogRepr::Bare(products) => Catalog { products, meta: None },
            CatalogRepr::Wrapped { products, meta } => Catalog {
                products,
                meta: Some(meta),
            },
        }
    }
}

impl From<Catalog> for CatalogRepr {
    fn from(catalog: Catalog) -> Self {
        match catalog.meta {
            None => CatalogRepr::Bare(catalog.products),
            Some(meta) => CatalogRepr::Wrapped {
                products: catalog.products,
                meta,
            },
        }
    }
}

impl Catalog {
    pub fn new(products: Vec<Product>) -> Self {
        Self { products, meta: None }
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_product() -> Product {
        serde_json::from_value(json!({
            "code": "T-100",
            "name": {"ru": "Стол", "en": "Table"},
            "description": {"ru": "Дубовый стол"},
            "attributes": {
                "color": {"label": {"ru": "Цвет"}, "value": {"ru": "Красный", "en": "Red"}}
            },
            "characteristics": [
                {"name": {"ru": "Вес"}, "value": {"ru": "12 кг", "en": ""}}
            ],
            "price": 199.5
        }))
        .unwrap()
    }

    #[test]
    fn pending_fields_cover_every_shape() {
        let product = sample_product();
        let paths: Vec<String> = product
            .pending_fields("ru", "en", false)
            .into_iter()
            .map(|p| p.path.to_string())
            .collect();
        assert_eq!(
            paths,
            vec![
                "description",
                "attributes.color.label",
                "characteristics[0].name",
                "characteristics[0].value",
            ]
        );
    }

    #[test]
    fn force_includes_translated_fields() {
        let product = sample_product();
        assert_eq!(product.pending_fields("ru", "en", true).len(), 6);
    }

    #[test]
    fn fields_without_source_text_are_ignored() {
        let mut product = sample_product();
        product.description = Localized::default();
        product.attributes.clear();
        product.characteristics.clear();
        assert!(product.is_translated("ru", "en"));
        assert!(!product.is_translated("ru", "de"));
    }

    #[test]
    fn field_mut_reaches_nested_texts() {
        let mut product = sample_product();
        product
            .field_mut(&FieldPath::AttributeLabel("color".into()))
            .unwrap()
            .set("en", "Color");
        product
            .field_mut(&FieldPath::CharacteristicValue(0))
            .unwrap()
            .set("en", "12 kg");
        assert_eq!(product.attributes["color"].label.get("en"), Some("Color"));
        assert_eq!(product.characteristics[0].value.get("en"), Some("12 kg"));
        assert!(product.field_mut(&FieldPath::CharacteristicName(3)).is_none());
    }

    #[test]
    fn extra_fields_survive_round_trip() {
        let product = sample_product();
        let value = serde_json::to_value(&product).unwrap();
        assert_eq!(value["price"], json!(199.5));
        assert_eq!(value["code"], json!("T-100"));
    }

    #[test]
    fn catalog_keeps_its_shape() {
        let bare: Catalog = serde_json::from_value(json!([{"code": 1}])).unwrap();
        assert!(bare.meta.is_none());
        assert!(serde_json::to_value(&bare).unwrap().is_array());

        let wrapped: Catalog =
            serde_json::from_value(json!({"generated_at": "2026-01-01", "products": [{"code": 2}]}))
                .unwrap();
        assert_eq!(wrapped.len(), 1);
        let out = serde_json::to_value(&wrapped).unwrap();
        assert_eq!(out["generated_at"], json!("2026-01-01"));
        assert_eq!(out["products"][0]["code"], json!(2));
    }

    #[test]
    fn display_name_prefers_source() {
        let product = sample_product();
        assert_eq!(product.display_name("ru"), "Стол");
        assert_eq!(product.display_name("fr"), "Table");
        assert_eq!(product.code_str(), "T-100");
    }
}
