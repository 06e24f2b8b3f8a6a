//! Procedural macros for tsqlmodel.
//!
//! `#[derive(Entity)]` turns a struct into a fully described row type: a
//! static `EntityDescriptor`, row conversion in both directions, identity
//! capture, and one `AttributeRef` constant per field for building typed
//! selections.

use proc_macro::TokenStream;
use quote::{format_ident, quote};

mod parse;

use parse::{EntityDef, FieldDef, parse_entity};

/// Derive macro for the `Entity` trait.
///
/// # Struct attributes
///
/// - `#[entity(table = "Field")]` - table name (defaults to the struct name without a `Row` suffix)
/// - `#[entity(schema = "dbo")]` - schema (defaults to the provider's default schema)
/// - `#[entity(alias = "F")]` - table alias
/// - `#[entity(name = "...")]` - entity name used in diagnostics
///
/// # Field attributes
///
/// - `#[entity(key)]` - part of the primary key
/// - `#[entity(identity)]` - IDENTITY column (implies `key`)
/// - `#[entity(column = "Name")]` - column name (defaults to the property name)
/// - `#[entity(property = "Name")]` - property name (defaults to the PascalCase field name)
/// - `#[entity(sql_type = "NVARCHAR(50)")]` - explicit column type
/// - `#[entity(nullable)]` - nullable even when the Rust type is not an `Option`
/// - `#[entity(skip)]` - not mapped; filled with `Default::default()`
/// - `#[entity(relation(on = "CategoryId = CategoryId", alias = "Other", join = "left"))]`
///   - embed a related entity; `Option<T>` relations default to LEFT JOIN
///
/// # Example
///
/// ```ignore
/// #[derive(Entity)]
/// #[entity(schema = "dbo")]
/// struct FieldRow {
///     #[entity(identity)]
///     field_id: i32,
///     name: String,
///     category_id: i32,
///     #[entity(relation(on = "CategoryId = CategoryId"))]
///     category: CategoryRow,
/// }
///
/// let selection = Selection::<FieldRow>::new()
///     .equal_to(FieldRow::CATEGORY.then(&CategoryRow::NAME), "Dates");
/// ```
#[proc_macro_derive(Entity, attributes(entity))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as syn::DeriveInput);

    let entity = match parse_entity(&input) {
        Ok(e) => e,
        Err(e) => return e.to_compile_error().into(),
    };

    generate_entity_impl(&entity).into()
}

fn generate_entity_impl(entity: &EntityDef) -> proc_macro2::TokenStream {
    let name = &entity.name;
    let entity_name = &entity.entity_name;
    let table = &entity.table;
    let schema = option_str(entity.schema.as_deref());
    let alias = option_str(entity.alias.as_deref());

    let attributes = generate_attribute_infos(entity);
    let relations = generate_relation_infos(entity);
    let to_row_body = generate_to_row(entity);
    let from_row_body = generate_from_row(entity);
    let set_identity = generate_set_identity(entity);
    let handles = generate_attribute_handles(entity);

    quote! {
        impl ::tsqlmodel_core::Entity for #name {
            fn descriptor() -> &'static ::tsqlmodel_core::EntityDescriptor {
                static DESCRIPTOR: ::tsqlmodel_core::EntityDescriptor =
                    ::tsqlmodel_core::EntityDescriptor {
                        entity_name: #entity_name,
                        schema: #schema,
                        table: #table,
                        alias: #alias,
                        attributes: &[#attributes],
                        relations: &[#relations],
                    };
                &DESCRIPTOR
            }

            fn to_row(&self) -> Vec<(&'static str, ::tsqlmodel_core::Value)> {
                #to_row_body
            }

            fn from_row(row: &::tsqlmodel_core::Row) -> ::tsqlmodel_core::Result<Self> {
                #from_row_body
            }

            #set_identity
        }

        impl #name {
            #handles
        }
    }
}

fn option_str(value: Option<&str>) -> proc_macro2::TokenStream {
    match value {
        Some(v) => quote! { Some(#v) },
        None => quote! { None },
    }
}

fn generate_attribute_infos(entity: &EntityDef) -> proc_macro2::TokenStream {
    let infos = entity.attribute_fields().map(|field| {
        let property = &field.property;
        let column = &field.column;
        let ty = &field.ty;
        let key = field.key;
        let identity = field.identity;

        let sql_type = match &field.sql_type {
            Some(explicit) => quote! { ::tsqlmodel_core::SqlType::Custom(#explicit) },
            None => quote! { <#ty as ::tsqlmodel_core::TypeInfo>::SQL_TYPE },
        };
        let nullable = match field.nullable {
            Some(explicit) => quote! { #explicit },
            None if parse::is_option_type(ty) => quote! { true },
            None if field.sql_type.is_some() => quote! { false },
            None => quote! { <#ty as ::tsqlmodel_core::TypeInfo>::NULLABLE },
        };

        quote! {
            ::tsqlmodel_core::AttributeInfo::new(#property, #column, #sql_type)
                .nullable(#nullable)
                .primary_key(#key)
                .identity(#identity)
        }
    });
    quote! { #(#infos),* }
}

fn generate_relation_infos(entity: &EntityDef) -> proc_macro2::TokenStream {
    let infos = entity.relation_fields().filter_map(|field| {
        let relation = field.relation.as_ref()?;
        let property = &field.property;
        let alias = option_str(relation.alias.as_deref());
        let target = &relation.target;
        let join = if relation.left {
            quote! { ::tsqlmodel_core::JoinType::Left }
        } else {
            quote! { ::tsqlmodel_core::JoinType::Inner }
        };
        let keys = relation.keys.iter().map(|(source, target)| {
            quote! { ::tsqlmodel_core::RelationKey::new(#source, #target) }
        });

        Some(quote! {
            ::tsqlmodel_core::RelationInfo {
                property: #property,
                alias: #alias,
                join_type: #join,
                keys: &[#(#keys),*],
                target: <#target as ::tsqlmodel_core::Entity>::descriptor,
            }
        })
    });
    quote! { #(#infos),* }
}

fn generate_to_row(entity: &EntityDef) -> proc_macro2::TokenStream {
    let conversions = entity.attribute_fields().map(|field| {
        let field_name = &field.name;
        let property = &field.property;
        quote! {
            (#property, ::tsqlmodel_core::Value::from(self.#field_name.clone()))
        }
    });
    quote! {
        vec![#(#conversions),*]
    }
}

fn generate_from_row(entity: &EntityDef) -> proc_macro2::TokenStream {
    let extractions = entity.fields.iter().map(|field| {
        let field_name = &field.name;
        let property = &field.property;

        if field.skip {
            return quote! { #field_name: Default::default() };
        }

        match &field.relation {
            Some(relation) => {
                let target = &relation.target;
                let prefix = format!("{}.", property);
                if relation.optional {
                    quote! {
                        #field_name: {
                            let related = row.subset_by_prefix(#prefix);
                            if related.is_all_null() {
                                None
                            } else {
                                Some(<#target as ::tsqlmodel_core::Entity>::from_row(&related)?)
                            }
                        }
                    }
                } else {
                    quote! {
                        #field_name: <#target as ::tsqlmodel_core::Entity>::from_row(
                            &row.subset_by_prefix(#prefix),
                        )?
                    }
                }
            }
            None if parse::is_option_type(&field.ty) => {
                quote! { #field_name: row.get_optional(#property)? }
            }
            None => quote! { #field_name: row.get_named(#property)? },
        }
    });

    quote! {
        Ok(Self {
            #(#extractions,)*
        })
    }
}

fn generate_set_identity(entity: &EntityDef) -> proc_macro2::TokenStream {
    let Some(field) = entity.identity_field() else {
        return quote! {};
    };
    let field_name = &field.name;
    quote! {
        fn set_identity(
            &mut self,
            value: &::tsqlmodel_core::Value,
        ) -> ::tsqlmodel_core::Result<()> {
            self.#field_name = ::tsqlmodel_core::FromValue::from_value(value)?;
            Ok(())
        }
    }
}

/// One `AttributeRef` constant per mapped field, named in SCREAMING_SNAKE_CASE.
fn generate_attribute_handles(entity: &EntityDef) -> proc_macro2::TokenStream {
    let handles = entity
        .fields
        .iter()
        .filter(|f| !f.skip)
        .map(|field: &FieldDef| {
            let const_name = format_ident!(
                "{}",
                syn::ext::IdentExt::unraw(&field.name).to_string().to_uppercase()
            );
            let property = &field.property;
            let doc = format!("Attribute path `{}`.", property);
            quote! {
                #[doc = #doc]
                pub const #const_name: ::tsqlmodel_core::AttributeRef =
                    ::tsqlmodel_core::AttributeRef::from_static(#property);
            }
        });
    quote! { #(#handles)* }
}
