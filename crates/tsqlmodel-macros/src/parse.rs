//! Parsing logic for the Entity derive macro.
//!
//! This module extracts struct-level and field-level `#[entity(...)]`
//! attributes into `EntityDef` and `FieldDef` for code generation.

use proc_macro2::Span;
use syn::ext::IdentExt;
use syn::{Attribute, Data, DeriveInput, Error, Field, Fields, Ident, Lit, Result, Type};

/// Parsed entity definition from a struct with `#[derive(Entity)]`.
#[derive(Debug)]
pub struct EntityDef {
    pub name: Ident,
    pub entity_name: String,
    pub schema: Option<String>,
    pub table: String,
    pub alias: Option<String>,
    pub fields: Vec<FieldDef>,
}

impl EntityDef {
    /// Fields mapped to columns of this entity's own table.
    pub fn attribute_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields
            .iter()
            .filter(|f| !f.skip && f.relation.is_none())
    }

    pub fn relation_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.relation.is_some())
    }

    pub fn identity_field(&self) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.identity)
    }
}

/// Parsed definition of one struct field.
#[derive(Debug)]
pub struct FieldDef {
    pub name: Ident,
    /// Property name (PascalCase of the field name unless overridden)
    pub property: String,
    pub column: String,
    pub ty: Type,
    pub sql_type: Option<String>,
    /// Explicit nullability; otherwise inferred from the Rust type
    pub nullable: Option<bool>,
    pub key: bool,
    pub identity: bool,
    pub skip: bool,
    pub relation: Option<RelationAttr>,
}

/// Parsed `relation(...)` content.
#[derive(Debug, Clone)]
pub struct RelationAttr {
    pub alias: Option<String>,
    /// `true` for LEFT JOIN
    pub left: bool,
    /// `(owner property, related property)` pairs
    pub keys: Vec<(String, String)>,
    /// Related entity type (the `T` in `T` or `Option<T>`)
    pub target: Type,
    pub optional: bool,
}

pub fn parse_entity(input: &DeriveInput) -> Result<EntityDef> {
    if !input.generics.params.is_empty() {
        return Err(Error::new_spanned(
            &input.generics,
            "Entity cannot be derived for generic structs",
        ));
    }

    let name = input.ident.clone();
    let attrs = parse_struct_attrs(&input.attrs)?;

    let fields = match &input.data {
        Data::Struct(data) => parse_fields(&data.fields)?,
        Data::Enum(_) => {
            return Err(Error::new_spanned(
                input,
                "Entity can only be derived for structs, not enums",
            ));
        }
        Data::Union(_) => {
            return Err(Error::new_spanned(
                input,
                "Entity can only be derived for structs, not unions",
            ));
        }
    };

    let identities: Vec<_> = fields.iter().filter(|f| f.identity).collect();
    if identities.len() > 1 {
        return Err(Error::new_spanned(
            &identities[1].name,
            "an entity can declare at most one identity field",
        ));
    }

    let entity_name = attrs.name.unwrap_or_else(|| name.to_string());
    let table = attrs
        .table
        .unwrap_or_else(|| derive_table_name(&name.to_string()));

    Ok(EntityDef {
        name,
        entity_name,
        schema: attrs.schema,
        table,
        alias: attrs.alias,
        fields,
    })
}

#[derive(Default)]
struct StructAttrs {
    name: Option<String>,
    schema: Option<String>,
    table: Option<String>,
    alias: Option<String>,
}

/// Parse struct-level `#[entity(...)]` attributes.
///
/// Supported keys: `table`, `schema`, `alias`, `name`.
fn parse_struct_attrs(attrs: &[Attribute]) -> Result<StructAttrs> {
    let mut result = StructAttrs::default();

    for attr in attrs {
        if !attr.path().is_ident("entity") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            let slot = if meta.path.is_ident("table") {
                &mut result.table
            } else if meta.path.is_ident("schema") {
                &mut result.schema
            } else if meta.path.is_ident("alias") {
                &mut result.alias
            } else if meta.path.is_ident("name") {
                &mut result.name
            } else {
                return Err(meta.error("unknown entity attribute"));
            };
            if slot.is_some() {
                return Err(meta.error("duplicate entity attribute"));
            }
            *slot = Some(string_value(&meta)?);
            Ok(())
        })?;
    }

    Ok(result)
}

/// `FieldRow` maps to table `Field`; other names map unchanged.
fn derive_table_name(struct_name: &str) -> String {
    match struct_name.strip_suffix("Row") {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => struct_name.to_string(),
    }
}

fn parse_fields(fields: &Fields) -> Result<Vec<FieldDef>> {
    match fields {
        Fields::Named(named) => named.named.iter().map(parse_field).collect(),
        Fields::Unnamed(_) => Err(Error::new(
            Span::call_site(),
            "Entity requires a struct with named fields, not a tuple struct",
        )),
        Fields::Unit => Err(Error::new(
            Span::call_site(),
            "Entity requires a struct with fields, not a unit struct",
        )),
    }
}

fn parse_field(field: &Field) -> Result<FieldDef> {
    let name = field
        .ident
        .clone()
        .ok_or_else(|| Error::new_spanned(field, "expected named field"))?;
    let ty = field.ty.clone();

    let mut column: Option<String> = None;
    let mut property: Option<String> = None;
    let mut sql_type: Option<String> = None;
    let mut nullable: Option<bool> = None;
    let mut key = false;
    let mut identity = false;
    let mut skip = false;
    let mut relation: Option<RelationAttr> = None;

    for attr in &field.attrs {
        if !attr.path().is_ident("entity") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            let path = &meta.path;
            if path.is_ident("key") {
                key = true;
            } else if path.is_ident("identity") {
                identity = true;
            } else if path.is_ident("nullable") {
                nullable = Some(true);
            } else if path.is_ident("skip") {
                skip = true;
            } else if path.is_ident("column") {
                column = Some(string_value(&meta)?);
            } else if path.is_ident("property") {
                property = Some(string_value(&meta)?);
            } else if path.is_ident("sql_type") {
                sql_type = Some(string_value(&meta)?);
            } else if path.is_ident("relation") {
                relation = Some(parse_relation(&meta, &ty)?);
            } else {
                return Err(meta.error("unknown entity field attribute"));
            }
            Ok(())
        })?;
    }

    if relation.is_some() && (key || identity || column.is_some() || sql_type.is_some()) {
        return Err(Error::new_spanned(
            &name,
            "a relation field cannot also be a key, identity or column",
        ));
    }
    if skip && (relation.is_some() || key || identity) {
        return Err(Error::new_spanned(&name, "a skipped field cannot carry mappings"));
    }

    let property = property.unwrap_or_else(|| to_pascal_case(&name.unraw().to_string()));
    let column = column.unwrap_or_else(|| property.clone());

    Ok(FieldDef {
        name,
        property,
        column,
        ty,
        sql_type,
        nullable,
        key: key || identity,
        identity,
        skip,
        relation,
    })
}

/// Parse `relation(on = "A = B, C = D", alias = "X", join = "left")`.
fn parse_relation(meta: &syn::meta::ParseNestedMeta<'_>, field_type: &Type) -> Result<RelationAttr> {
    let mut alias: Option<String> = None;
    let mut join: Option<String> = None;
    let mut on: Option<(String, Span)> = None;

    meta.parse_nested_meta(|nested| {
        if nested.path.is_ident("alias") {
            alias = Some(string_value(&nested)?);
        } else if nested.path.is_ident("join") {
            join = Some(string_value(&nested)?);
        } else if nested.path.is_ident("on") {
            let span = nested.path.get_ident().map_or_else(Span::call_site, Ident::span);
            on = Some((string_value(&nested)?, span));
        } else {
            return Err(nested.error("unknown relation attribute"));
        }
        Ok(())
    })?;

    let (on, on_span) = on.ok_or_else(|| meta.error("relation requires `on = \"Source = Target\"`"))?;
    let keys = parse_keys(&on).map_err(|msg| Error::new(on_span, msg))?;

    let optional = is_option_type(field_type);
    let target = if optional {
        option_inner_type(field_type)
            .cloned()
            .ok_or_else(|| Error::new_spanned(field_type, "expected Option<Entity>"))?
    } else {
        field_type.clone()
    };

    let left = match join.as_deref() {
        Some("left") => true,
        Some("inner") => false,
        Some(other) => {
            return Err(meta.error(format!(
                "unknown join type '{}', expected \"inner\" or \"left\"",
                other
            )));
        }
        None => optional,
    };

    Ok(RelationAttr {
        alias,
        left,
        keys,
        target,
        optional,
    })
}

/// Parse `"A = B, C = D"` into key pairs.
pub fn parse_keys(on: &str) -> std::result::Result<Vec<(String, String)>, String> {
    let mut keys = Vec::new();
    for pair in on.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (source, target) = pair
            .split_once('=')
            .ok_or_else(|| format!("expected `Source = Target`, found `{}`", pair))?;
        let (source, target) = (source.trim(), target.trim());
        if source.is_empty() || target.is_empty() {
            return Err(format!("empty key in `{}`", pair));
        }
        keys.push((source.to_string(), target.to_string()));
    }
    if keys.is_empty() {
        return Err("relation declares no keys".to_string());
    }
    Ok(keys)
}

fn string_value(meta: &syn::meta::ParseNestedMeta<'_>) -> Result<String> {
    let value: Lit = meta.value()?.parse()?;
    match value {
        Lit::Str(lit) => Ok(lit.value()),
        other => Err(Error::new_spanned(other, "expected string literal")),
    }
}

/// `field_value_id` -> `FieldValueId`
pub fn to_pascal_case(s: &str) -> String {
    s.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

/// Check if a type is `Option<T>`.
pub fn is_option_type(ty: &Type) -> bool {
    if let Type::Path(type_path) = ty {
        if let Some(segment) = type_path.path.segments.last() {
            return segment.ident == "Option";
        }
    }
    false
}

fn option_inner_type(ty: &Type) -> Option<&Type> {
    let Type::Path(type_path) = ty else {
        return None;
    };
    let segment = type_path.path.segments.last()?;
    let syn::PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    args.args.iter().find_map(|arg| match arg {
        syn::GenericArgument::Type(inner) => Some(inner),
        _ => None,
    })
}
