//! Procedural macros for the docmodel project.
//!
//! `#[derive(Record)]` turns a named-field struct into a record type: it implements
//! `Shaped` with the struct's field annotation table and the `Record` marker trait.
//!
//! # Field attributes
//!
//! - `#[record(natural = "name,omitempty")]` overrides the natural (serde) name annotation.
//!   Without it the annotation follows `#[serde(rename = "..")]`, the container's
//!   `#[serde(rename_all = "..")]`, `#[serde(skip)]` and `#[serde(skip_serializing_if = "..")]`.
//!   `natural = "-"` hides a field that serde still serializes under its Rust name, so it can
//!   be stored without showing up in JSON renderings.
//! - `#[record(storage = "name,omitempty")]` sets the storage name annotation; `"-"` keeps
//!   the field out of storage.
//! - `#[record(relation = "id_field,lookup_field")]` (alias `populate`) marks a relation.
//!   Relation fields are never stored.
//! - `#[record(base)]` marks an embedded base record that is not mapped.
//!
//! # Container attributes
//!
//! - `#[record(name = "...")]` overrides the type name reported in metadata and errors.

#[allow(unused_extern_crates)]
extern crate self as docmodel_macros;

use proc_macro::TokenStream;
use quote::quote;
use syn::{Attribute, Data, DeriveInput, Error, Fields, LitStr, Result, parse_macro_input};

/// Derives `Shaped` and `Record` for a struct with named fields.
///
/// ```ignore
/// #[derive(Debug, Clone, Default, Serialize, Deserialize, Record)]
/// #[serde(default)]
/// pub struct Post {
///     #[record(storage = "_id")]
///     pub id: ObjectId,
///     pub author_id: ObjectId,
///     #[record(relation = "author_id")]
///     pub author: Option<User>,
/// }
/// ```
#[proc_macro_derive(Record, attributes(record))]
pub fn derive_record(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    expand(&input)
        .unwrap_or_else(Error::into_compile_error)
        .into()
}

#[derive(Default)]
struct FieldAttrs {
    natural: Option<String>,
    storage: Option<String>,
    relation: Option<String>,
    base: bool,
}

#[derive(Default)]
struct SerdeAttrs {
    rename: Option<String>,
    skip: bool,
    omit_empty: bool,
}

fn expand(input: &DeriveInput) -> Result<proc_macro2::TokenStream> {
    let ident = &input.ident;
    if !input.generics.params.is_empty() {
        return Err(Error::new_spanned(
            &input.generics,
            "Record cannot be derived for generic types",
        ));
    }

    let Data::Struct(data) = &input.data else {
        return Err(Error::new_spanned(ident, "Record can only be derived for structs"));
    };
    let Fields::Named(named) = &data.fields else {
        return Err(Error::new_spanned(
            &data.fields,
            "Record can only be derived for structs with named fields",
        ));
    };

    let type_name = container_name(&input.attrs)?.unwrap_or_else(|| ident.to_string());
    let rename_all = container_rename_all(&input.attrs)?;

    let mut fields = Vec::with_capacity(named.named.len());
    for field in &named.named {
        let Some(name) = &field.ident else {
            continue;
        };
        let name = name.to_string();
        let name = name.strip_prefix("r#").unwrap_or(&name).to_string();
        let ty = &field.ty;

        let attrs = field_attrs(&field.attrs)?;
        let serde = serde_attrs(&field.attrs)?;
        let serde_name = serde
            .rename
            .or_else(|| rename_all.map(|rule| rule.apply(&name)));

        if attrs.natural.as_deref() == Some("-")
            && !serde.skip
            && serde_name.as_ref().is_some_and(|serde_name| *serde_name != name)
        {
            return Err(Error::new_spanned(
                field,
                "natural = \"-\" requires serde to serialize the field under its Rust name",
            ));
        }

        let natural = attrs.natural.or_else(|| {
            if serde.skip {
                Some("-".to_string())
            } else {
                match (serde_name, serde.omit_empty) {
                    (Some(rename), true) => Some(format!("{rename},omitempty")),
                    (Some(rename), false) => Some(rename),
                    (None, true) => Some(",omitempty".to_string()),
                    (None, false) => None,
                }
            }
        });
        let storage = attrs
            .storage
            .or_else(|| attrs.relation.as_ref().map(|_| "-".to_string()));

        let mut field_shape = quote! {
            ::docmodel::shape::FieldShape::new(
                #name,
                <#ty as ::docmodel::shape::Shaped>::type_shape(),
            )
        };
        if let Some(natural) = natural {
            field_shape = quote! { #field_shape.natural(#natural) };
        }
        if let Some(storage) = storage {
            field_shape = quote! { #field_shape.storage(#storage) };
        }
        if let Some(relation) = attrs.relation {
            field_shape = quote! { #field_shape.relation(#relation) };
        }
        if attrs.base {
            field_shape = quote! { #field_shape.base() };
        }

        fields.push(field_shape);
    }

    Ok(quote! {
        impl ::docmodel::shape::Shaped for #ident {
            fn type_shape() -> ::docmodel::shape::TypeShape {
                ::docmodel::shape::TypeShape::Record(
                    ::docmodel::shape::RecordShape::new::<#ident>(#type_name, || {
                        ::std::vec![#(#fields),*]
                    })
                )
            }
        }

        impl ::docmodel::document::Record for #ident {}
    })
}

fn container_name(attrs: &[Attribute]) -> Result<Option<String>> {
    let mut name = None;

    for attr in attrs.iter().filter(|attr| attr.path().is_ident("record")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                let value: LitStr = meta.value()?.parse()?;
                name = Some(value.value());
                Ok(())
            } else {
                Err(meta.error("unsupported record container attribute"))
            }
        })?;
    }

    Ok(name)
}

/// Field casing rules accepted by `#[serde(rename_all = "..")]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RenameRule {
    Lower,
    Upper,
    Pascal,
    Camel,
    Snake,
    ScreamingSnake,
    Kebab,
    ScreamingKebab,
}

impl RenameRule {
    fn parse(rule: &LitStr) -> Result<Self> {
        Ok(match rule.value().as_str() {
            "lowercase" => Self::Lower,
            "UPPERCASE" => Self::Upper,
            "PascalCase" => Self::Pascal,
            "camelCase" => Self::Camel,
            "snake_case" => Self::Snake,
            "SCREAMING_SNAKE_CASE" => Self::ScreamingSnake,
            "kebab-case" => Self::Kebab,
            "SCREAMING-KEBAB-CASE" => Self::ScreamingKebab,
            other => {
                return Err(Error::new_spanned(rule, format!("unknown rename_all rule `{other}`")));
            }
        })
    }

    /// Renames a snake_case field the way serde does.
    fn apply(self, field: &str) -> String {
        match self {
            Self::Lower | Self::Snake => field.to_string(),
            Self::Upper | Self::ScreamingSnake => field.to_ascii_uppercase(),
            Self::Pascal => {
                let mut pascal = String::with_capacity(field.len());
                let mut capitalize = true;
                for ch in field.chars() {
                    if ch == '_' {
                        capitalize = true;
                    } else if capitalize {
                        pascal.push(ch.to_ascii_uppercase());
                        capitalize = false;
                    } else {
                        pascal.push(ch);
                    }
                }
                pascal
            }
            Self::Camel => {
                let pascal = Self::Pascal.apply(field);
                let mut chars = pascal.chars();
                match chars.next() {
                    Some(first) => first.to_ascii_lowercase().to_string() + chars.as_str(),
                    None => pascal,
                }
            }
            Self::Kebab => field.replace('_', "-"),
            Self::ScreamingKebab => Self::ScreamingSnake.apply(field).replace('_', "-"),
        }
    }
}

/// Reads the serialization casing from the container's serde attributes.
fn container_rename_all(attrs: &[Attribute]) -> Result<Option<RenameRule>> {
    let mut rule = None;

    for attr in attrs.iter().filter(|attr| attr.path().is_ident("serde")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("rename_all") {
                if meta.input.peek(syn::Token![=]) {
                    let value: LitStr = meta.value()?.parse()?;
                    rule = Some(RenameRule::parse(&value)?);
                } else {
                    meta.parse_nested_meta(|inner| {
                        let value: LitStr = inner.value()?.parse()?;
                        if inner.path.is_ident("serialize") {
                            rule = Some(RenameRule::parse(&value)?);
                        }
                        Ok(())
                    })?;
                }
            } else {
                skip_meta_value(&meta)?;
            }
            Ok(())
        })?;
    }

    Ok(rule)
}

fn skip_meta_value(meta: &syn::meta::ParseNestedMeta) -> Result<()> {
    if meta.input.peek(syn::Token![=]) {
        let _: syn::Expr = meta.value()?.parse()?;
    } else if meta.input.peek(syn::token::Paren) {
        let _content;
        syn::parenthesized!(_content in meta.input);
    }
    Ok(())
}

fn field_attrs(attrs: &[Attribute]) -> Result<FieldAttrs> {
    let mut parsed = FieldAttrs::default();

    for attr in attrs.iter().filter(|attr| attr.path().is_ident("record")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("natural") {
                let value: LitStr = meta.value()?.parse()?;
                parsed.natural = Some(value.value());
            } else if meta.path.is_ident("storage") {
                let value: LitStr = meta.value()?.parse()?;
                parsed.storage = Some(value.value());
            } else if meta.path.is_ident("relation") || meta.path.is_ident("populate") {
                let value: LitStr = meta.value()?.parse()?;
                parsed.relation = Some(value.value());
            } else if meta.path.is_ident("base") {
                parsed.base = true;
            } else {
                return Err(meta.error("unsupported record field attribute"));
            }
            Ok(())
        })?;
    }

    Ok(parsed)
}

/// Reads the serde attributes that change a field's natural name or presence. Everything
/// else is left to serde.
fn serde_attrs(attrs: &[Attribute]) -> Result<SerdeAttrs> {
    let mut parsed = SerdeAttrs::default();

    for attr in attrs.iter().filter(|attr| attr.path().is_ident("serde")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("rename") {
                if meta.input.peek(syn::Token![=]) {
                    let value: LitStr = meta.value()?.parse()?;
                    parsed.rename = Some(value.value());
                } else {
                    meta.parse_nested_meta(|inner| {
                        let value: LitStr = inner.value()?.parse()?;
                        if inner.path.is_ident("serialize") {
                            parsed.rename = Some(value.value());
                        }
                        Ok(())
                    })?;
                }
            } else if meta.path.is_ident("skip") || meta.path.is_ident("skip_serializing") {
                parsed.skip = true;
            } else if meta.path.is_ident("skip_serializing_if") {
                let _: LitStr = meta.value()?.parse()?;
                parsed.omit_empty = true;
            } else {
                skip_meta_value(&meta)?;
            }
            Ok(())
        })?;
    }

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::parse_quote;

    #[test]
    fn rename_rules_follow_serde_casing() {
        let field = "last_login_at";

        assert_eq!(RenameRule::Camel.apply(field), "lastLoginAt");
        assert_eq!(RenameRule::Pascal.apply(field), "LastLoginAt");
        assert_eq!(RenameRule::ScreamingSnake.apply(field), "LAST_LOGIN_AT");
        assert_eq!(RenameRule::Kebab.apply(field), "last-login-at");
        assert_eq!(RenameRule::ScreamingKebab.apply(field), "LAST-LOGIN-AT");
        assert_eq!(RenameRule::Lower.apply(field), field);
    }

    #[test]
    fn container_casing_is_read_from_serde() {
        let input: DeriveInput = parse_quote! {
            #[derive(Serialize)]
            #[serde(default, rename_all(serialize = "camelCase", deserialize = "snake_case"))]
            struct Profile {
                first_name: String,
            }
        };

        assert_eq!(container_rename_all(&input.attrs).unwrap(), Some(RenameRule::Camel));
    }

    #[test]
    fn natural_names_use_the_container_casing() {
        let input: DeriveInput = parse_quote! {
            #[serde(rename_all = "camelCase")]
            struct Profile {
                first_name: String,
                #[serde(rename = "surname")]
                last_name: String,
                #[serde(skip_serializing_if = "Option::is_none")]
                nick_name: Option<String>,
            }
        };

        let expanded = expand(&input).unwrap().to_string();
        assert!(expanded.contains("\"firstName\""));
        assert!(expanded.contains("\"surname\""));
        assert!(expanded.contains("\"nickName,omitempty\""));
        assert!(!expanded.contains("\"lastName\""));
    }

    #[test]
    fn unknown_casing_and_hidden_renamed_fields_are_rejected() {
        let unknown: DeriveInput = parse_quote! {
            #[serde(rename_all = "Title Case")]
            struct Profile {
                first_name: String,
            }
        };
        assert!(expand(&unknown).is_err());

        let hidden: DeriveInput = parse_quote! {
            #[serde(rename_all = "camelCase")]
            struct Account {
                #[record(natural = "-", storage = "pin_hash")]
                pin_hash: String,
            }
        };
        assert!(expand(&hidden).is_err());
    }
}
