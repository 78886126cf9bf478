//! Implementation of the `Grain` derive macro.

use proc_macro2::TokenStream;
use quote::quote;
use syn::{DeriveInput, LitStr, Type};

fn key_shape(value: &LitStr) -> syn::Result<TokenStream> {
    let variant = match value.value().as_str() {
        "guid" => quote! { Guid },
        "integer" => quote! { Integer },
        "string" => quote! { String },
        "guid_compound" => quote! { GuidCompound },
        "integer_compound" => quote! { IntegerCompound },
        _ => {
            return Err(syn::Error::new_spanned(
                value,
                "expected one of `guid`, `integer`, `string`, `guid_compound` or `integer_compound`",
            ));
        }
    };
    Ok(quote! { ::granary_core::grain::GrainKeyShape::#variant })
}

fn expand(input: DeriveInput) -> syn::Result<TokenStream> {
    let mut state: Option<Type> = None;
    let mut shape: Option<TokenStream> = None;
    let mut name: Option<LitStr> = None;

    for attr in &input.attrs {
        if !attr.path().is_ident("grain") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("state") {
                state = Some(meta.value()?.parse()?);
            } else if meta.path.is_ident("key") {
                let value: LitStr = meta.value()?.parse()?;
                shape = Some(key_shape(&value)?);
            } else if meta.path.is_ident("name") {
                name = Some(meta.value()?.parse()?);
            } else {
                return Err(meta.error("expected `state`, `key` or `name`"));
            }
            Ok(())
        })?;
    }

    let state = state.ok_or_else(|| {
        syn::Error::new_spanned(&input.ident, "missing `#[grain(state = ...)]`")
    })?;
    let shape = shape.ok_or_else(|| {
        syn::Error::new_spanned(&input.ident, "missing `#[grain(key = \"...\")]`")
    })?;
    let grain_type = name.map(|name| {
        quote! {
            fn grain_type() -> &'static str {
                #name
            }
        }
    });

    let struct_name = &input.ident;
    let (impl_generics, type_generics, where_clause) = input.generics.split_for_impl();
    Ok(quote! {
        impl #impl_generics ::granary_core::grain::Grain for #struct_name #type_generics #where_clause {
            type State = #state;
            const KEY_SHAPE: ::granary_core::grain::GrainKeyShape = #shape;
            #grain_type
        }
    })
}

pub fn grain_impl(item: proc_macro::TokenStream) -> proc_macro::TokenStream {
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
    fn requires_a_state_type() {
        let input: DeriveInput = syn::parse_quote! {
            #[grain(key = "guid")]
            struct ProfileGrain;
        };
        let err = expand(input).unwrap_err();
        assert!(err.to_string().contains("state"));
    }

    #[test]
    fn rejects_unknown_key_shapes() {
        let input: DeriveInput = syn::parse_quote! {
            #[grain(state = Profile, key = "uuid")]
            struct ProfileGrain;
        };
        assert!(expand(input).is_err());
    }
}
