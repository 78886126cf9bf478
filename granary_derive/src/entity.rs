//! Implementation of the `Entity` derive macro.

use proc_macro2::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, LitStr, Type};

struct EntityAttrs {
    table: Option<String>,
    name: Option<String>,
}

#[derive(Default)]
struct PropertyAttrs {
    key: bool,
    concurrency_token: bool,
    row_version: bool,
    unreadable: bool,
    skip: bool,
    column: Option<String>,
}

struct Property<'a> {
    ident: &'a syn::Ident,
    ty: &'a Type,
    attrs: PropertyAttrs,
}

fn parse_entity_attrs(input: &DeriveInput) -> syn::Result<EntityAttrs> {
    let mut attrs = EntityAttrs {
        table: None,
        name: None,
    };
    for attr in &input.attrs {
        if !attr.path().is_ident("entity") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("table") {
                let value: LitStr = meta.value()?.parse()?;
                attrs.table = Some(value.value());
                Ok(())
            } else if meta.path.is_ident("name") {
                let value: LitStr = meta.value()?.parse()?;
                attrs.name = Some(value.value());
                Ok(())
            } else {
                Err(meta.error("expected `table` or `name`"))
            }
        })?;
    }
    Ok(attrs)
}

fn parse_property_attrs(field: &syn::Field) -> syn::Result<PropertyAttrs> {
    let mut attrs = PropertyAttrs::default();
    for attr in &field.attrs {
        if !attr.path().is_ident("property") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("key") {
                attrs.key = true;
            } else if meta.path.is_ident("concurrency_token") {
                attrs.concurrency_token = true;
            } else if meta.path.is_ident("row_version") {
                attrs.row_version = true;
            } else if meta.path.is_ident("unreadable") {
                attrs.unreadable = true;
            } else if meta.path.is_ident("skip") {
                attrs.skip = true;
            } else if meta.path.is_ident("column") {
                let value: LitStr = meta.value()?.parse()?;
                attrs.column = Some(value.value());
            } else {
                return Err(meta.error(
                    "expected one of `key`, `concurrency_token`, `row_version`, `unreadable`, `skip` or `column`",
                ));
            }
            Ok(())
        })?;
    }
    if attrs.skip && (attrs.key || attrs.concurrency_token || attrs.row_version) {
        return Err(syn::Error::new_spanned(
            field,
            "a skipped field cannot be a key or a concurrency token",
        ));
    }
    Ok(attrs)
}

fn descriptor(property: &Property) -> TokenStream {
    let ident = property.ident;
    let ty = property.ty;
    let name = ident.to_string();
    let mut tokens = quote! {
        ::granary_core::entity::PropertyDescriptor::new(
            #name,
            <#ty as ::granary_core::value::PropertyValue>::KIND,
            |entity: &Self| ::granary_core::value::PropertyValue::to_value(&entity.#ident),
        )
        .nullable(<#ty as ::granary_core::value::PropertyValue>::NULLABLE)
    };
    if let Some(column) = &property.attrs.column {
        tokens.extend(quote! { .column(#column) });
    }
    if property.attrs.key {
        tokens.extend(quote! { .key() });
    }
    if property.attrs.row_version {
        tokens.extend(quote! { .row_version() });
    } else if property.attrs.concurrency_token {
        tokens.extend(quote! { .concurrency_token() });
    }
    if property.attrs.unreadable {
        tokens.extend(quote! { .unreadable() });
    }
    tokens
}

fn expand(input: DeriveInput) -> syn::Result<TokenStream> {
    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    &input,
                    "Entity can only be derived for structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                &input,
                "Entity can only be derived for structs",
            ));
        }
    };

    let entity_attrs = parse_entity_attrs(&input)?;
    let mut properties = Vec::with_capacity(fields.len());
    for field in fields {
        properties.push(Property {
            ident: field.ident.as_ref().ok_or_else(|| {
                syn::Error::new_spanned(field, "Entity fields must be named")
            })?,
            ty: &field.ty,
            attrs: parse_property_attrs(field)?,
        });
    }

    let struct_name = &input.ident;
    let (impl_generics, type_generics, where_clause) = input.generics.split_for_impl();

    let entity_name = match &entity_attrs.name {
        Some(name) => quote! { #name },
        None => {
            let short = struct_name.to_string();
            quote! { concat!(module_path!(), "::", #short) }
        }
    };
    let with_table = entity_attrs
        .table
        .as_ref()
        .map(|table| quote! { .with_table(#table) });

    let descriptors = properties
        .iter()
        .filter(|p| !p.attrs.skip)
        .map(descriptor);

    let field_inits = properties.iter().map(|p| {
        let ident = p.ident;
        let ty = p.ty;
        let name = ident.to_string();
        if p.attrs.skip {
            quote! { #ident: ::core::default::Default::default() }
        } else {
            quote! {
                #ident: <#ty as ::granary_core::value::PropertyValue>::from_value(values.take(#name))
                    .map_err(|e| e.in_property(#name))?
            }
        }
    });

    Ok(quote! {
        impl #impl_generics ::granary_core::entity::Entity for #struct_name #type_generics #where_clause {
            fn entity_type() -> ::granary_core::entity::EntityType<Self> {
                ::granary_core::entity::EntityType::new(
                    #entity_name,
                    vec![#(#descriptors),*],
                )
                #with_table
            }

            #[allow(unused_mut, unused_variables)]
            fn materialize(
                mut values: ::granary_core::entity::PropertyValues,
            ) -> ::core::result::Result<Self, ::granary_core::value::ValueError> {
                ::core::result::Result::Ok(Self {
                    #(#field_inits),*
                })
            }
        }
    })
}

pub fn entity_impl(item: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let input = match syn::parse::<DeriveInput>(item) {
        Ok(tree) => tree,
        Err(e) => return e.to_compile_error().into(),
    };
    expand(input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_keys_tokens_and_skipped_fields() {
        let input: DeriveInput = syn::parse_quote! {
            #[entity(table = "profiles")]
            struct Profile {
                #[property(key)]
                id: uuid::Uuid,
                #[property(row_version, column = "row_version")]
                version: Vec<u8>,
                #[property(skip)]
                greeting: Option<String>,
            }
        };
        let output = expand(input).unwrap().to_string();
        assert!(output.contains(". key ()"));
        assert!(output.contains(". row_version ()"));
        assert!(output.contains(". column (\"row_version\")"));
        assert!(output.contains(". with_table (\"profiles\")"));
        assert!(output.contains("greeting"));
        assert!(!output.contains("\"greeting\""));
    }

    #[test]
    fn rejects_tuple_structs() {
        let input: DeriveInput = syn::parse_quote! {
            struct Profile(uuid::Uuid);
        };
        let err = expand(input).unwrap_err();
        assert!(err.to_string().contains("named fields"));
    }

    #[test]
    fn rejects_skipped_keys() {
        let input: DeriveInput = syn::parse_quote! {
            struct Profile {
                #[property(key, skip)]
                id: i64,
            }
        };
        assert!(expand(input).is_err());
    }

    #[test]
    fn rejects_unknown_property_attributes() {
        let input: DeriveInput = syn::parse_quote! {
            struct Profile {
                #[property(primary)]
                id: i64,
            }
        };
        let err = expand(input).unwrap_err();
        assert!(err.to_string().contains("expected one of"));
    }
}
