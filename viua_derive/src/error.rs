//! Derive macro for error types.
//!
//! Generates `std::fmt::Display` and `std::error::Error` implementations.
//! Replacement for the `thiserror` crate.
//!
//! # Usage
//!
//! ```ignore
//! use viua_derive::Error;
//!
//! #[derive(Debug, Error)]
//! pub enum MyError {
//!     #[error("not found: {0}")]
//!     NotFound(String),
//!
//!     #[error("invalid value: expected {expected}, got {actual}")]
//!     InvalidValue { expected: u32, actual: u32 },
//!
//!     #[error("unknown error")]
//!     Unknown,
//! }
//! ```
//!
//! Supported shapes: unit variants, tuple variants with positional
//! interpolation (`{0}`, `{1:#x}`), and struct variants with named
//! interpolation (`{field}`, `{field:#x}`). Fields that do not appear in
//! the message are allowed; they simply are not passed to the formatter.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Fields, Lit, Meta};

/// Derives `Display` and `Error` for an enum.
///
/// Each variant must carry an `#[error("...")]` attribute specifying the
/// display message.
pub fn derive_error(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match expand(&input) {
        Ok(tokens) => TokenStream::from(tokens),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let data_enum = match &input.data {
        Data::Enum(data_enum) => data_enum,
        _ => {
            return Err(syn::Error::new_spanned(
                input,
                "Error derive supports only enums",
            ));
        }
    };

    let display_arms = data_enum
        .variants
        .iter()
        .map(|variant| {
            let variant_name = &variant.ident;
            let message = error_message(&variant.attrs, variant)?;

            let arm = match &variant.fields {
                Fields::Unit => quote! {
                    Self::#variant_name => write!(f, #message),
                },
                Fields::Unnamed(fields) => {
                    // Bind only the positions the message interpolates;
                    // the rest become `_`.
                    let bindings: Vec<_> = (0..fields.unnamed.len())
                        .map(|i| {
                            if interpolates(&message, &i.to_string()) {
                                let ident = quote::format_ident!("f{}", i);
                                quote! { #ident }
                            } else {
                                quote! { _ }
                            }
                        })
                        .collect();
                    let used: Vec<_> = (0..fields.unnamed.len())
                        .filter(|i| interpolates(&message, &i.to_string()))
                        .map(|i| quote::format_ident!("f{}", i))
                        .collect();
                    let format_str = positional_to_named(&message, fields.unnamed.len());
                    quote! {
                        Self::#variant_name(#(#bindings),*) =>
                            write!(f, #format_str, #(#used = #used),*),
                    }
                }
                Fields::Named(fields) => {
                    let used: Vec<_> = fields
                        .named
                        .iter()
                        .filter_map(|field| field.ident.as_ref())
                        .filter(|ident| interpolates(&message, &ident.to_string()))
                        .collect();
                    quote! {
                        Self::#variant_name { #(#used,)* .. } =>
                            write!(f, #message, #(#used = #used),*),
                    }
                }
            };

            Ok(arm)
        })
        .collect::<syn::Result<Vec<_>>>()?;

    Ok(quote! {
        impl #impl_generics ::std::fmt::Display for #name #ty_generics #where_clause {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                match self {
                    #(#display_arms)*
                }
            }
        }

        impl #impl_generics ::std::error::Error for #name #ty_generics #where_clause {}
    })
}

/// True when the message interpolates `{key}` or `{key:spec}`.
fn interpolates(message: &str, key: &str) -> bool {
    message.contains(&format!("{{{key}}}")) || message.contains(&format!("{{{key}:"))
}

/// Extracts the message from an `#[error("...")]` attribute.
fn error_message<T: quote::ToTokens>(attrs: &[syn::Attribute], target: &T) -> syn::Result<String> {
    for attr in attrs {
        if !attr.path().is_ident("error") {
            continue;
        }

        let Meta::List(meta_list) = &attr.meta else {
            return Err(syn::Error::new_spanned(
                &attr.meta,
                "invalid #[error] attribute; use #[error(\"message\")]",
            ));
        };

        let lit = syn::parse2::<Lit>(meta_list.tokens.clone()).map_err(|_| {
            syn::Error::new_spanned(
                &attr.meta,
                "failed to parse #[error] attribute; expected a string literal \
                 like #[error(\"invalid opcode: {0}\")]",
            )
        })?;

        if let Lit::Str(lit_str) = lit {
            return Ok(lit_str.value());
        }

        return Err(syn::Error::new_spanned(
            &attr.meta,
            "invalid #[error] attribute: message must be a string literal",
        ));
    }

    Err(syn::Error::new_spanned(
        target,
        "missing #[error(\"...\")] attribute; every error variant must declare a display message",
    ))
}

/// Converts positional interpolations `{0}`, `{1:#x}` to named ones
/// (`{f0}`, `{f1:#x}`) so tuple fields can be passed as named arguments.
fn positional_to_named(format_str: &str, field_count: usize) -> String {
    let mut result = format_str.to_string();
    for i in (0..field_count).rev() {
        result = result.replace(&format!("{{{i}}}"), &format!("{{f{i}}}"));
        result = result.replace(&format!("{{{i}:"), &format!("{{f{i}:"));
    }
    result
}
