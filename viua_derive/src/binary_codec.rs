//! Derive macro for automatic binary serialization.
//!
//! Generates `Encode` and `Decode` implementations for structs and enums,
//! targeting the traits in the main crate's `encoding` module.
//!
//! # Binary Format
//!
//! Fields are serialized in declaration order:
//! - Integers: little-endian, fixed-width
//! - Arrays: elements serialized sequentially
//! - `Vec`/`String`: 8-byte length prefix (little-endian u64) followed by data
//!
//! The format is deterministic. For structs made of fixed-width integers
//! and byte arrays it is also prefix-free, which is what lets the ELF
//! header and table-entry types serialize to their exact on-disk layout.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Data, DataEnum, DeriveInput, Fields};

/// Derives `Encode` and `Decode` for a type.
///
/// ```ignore
/// use viua_derive::BinaryCodec;
///
/// #[derive(BinaryCodec)]
/// pub struct Header {
///     pub version: u32,
///     pub entry: u64,
/// }
/// ```
pub fn derive_binary_codec(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let (encode_body, decode_body) = match &input.data {
        Data::Struct(data_struct) => match &data_struct.fields {
            Fields::Named(fields) => {
                let field_names: Vec<_> = fields.named.iter().map(|f| &f.ident).collect();
                let encode = quote! {
                    #( crate::encoding::Encode::encode(&self.#field_names, out); )*
                };
                let decode = quote! {
                    Ok(Self {
                        #( #field_names: crate::encoding::Decode::decode(input)?, )*
                    })
                };
                (encode, decode)
            }
            Fields::Unnamed(fields) => {
                let indices: Vec<_> = (0..fields.unnamed.len()).map(syn::Index::from).collect();
                let decode_fields = indices.iter().map(|_| {
                    quote! { crate::encoding::Decode::decode(input)?, }
                });
                let encode = quote! {
                    #( crate::encoding::Encode::encode(&self.#indices, out); )*
                };
                let decode = quote! {
                    Ok(Self( #(#decode_fields)* ))
                };
                (encode, decode)
            }
            Fields::Unit => (quote! {}, quote! { Ok(Self) }),
        },
        Data::Enum(data_enum) => enum_bodies(data_enum),
        Data::Union(_) => {
            return syn::Error::new_spanned(&input, "BinaryCodec derive does not support unions")
                .to_compile_error()
                .into();
        }
    };

    let expanded = quote! {
        impl #impl_generics crate::encoding::Encode for #name #ty_generics #where_clause {
            fn encode<S: crate::encoding::EncodeSink>(&self, out: &mut S) {
                #encode_body
            }
        }

        impl #impl_generics crate::encoding::Decode for #name #ty_generics #where_clause {
            fn decode(
                input: &mut &[u8],
            ) -> ::std::result::Result<Self, crate::encoding::DecodeError> {
                #decode_body
            }
        }
    };

    TokenStream::from(expanded)
}

/// Builds encode/decode match bodies for enums.
///
/// Enums are encoded as a u8 discriminant followed by the variant's fields
/// in declaration order. Explicit discriminant values (`Variant = 5`) are
/// respected; implicit ones auto-increment from the previous variant.
fn enum_bodies(data_enum: &DataEnum) -> (proc_macro2::TokenStream, proc_macro2::TokenStream) {
    let discriminants = compute_discriminants(data_enum);

    let encode_arms = data_enum
        .variants
        .iter()
        .zip(discriminants.iter())
        .map(|(variant, &idx)| {
            let variant_name = &variant.ident;
            match &variant.fields {
                Fields::Unit => quote! {
                    Self::#variant_name => {
                        crate::encoding::Encode::encode(&#idx, out);
                    }
                },
                Fields::Unnamed(fields) => {
                    let field_names: Vec<_> = (0..fields.unnamed.len())
                        .map(|i| quote::format_ident!("f{}", i))
                        .collect();
                    quote! {
                        Self::#variant_name(#(#field_names),*) => {
                            crate::encoding::Encode::encode(&#idx, out);
                            #( crate::encoding::Encode::encode(#field_names, out); )*
                        }
                    }
                }
                Fields::Named(fields) => {
                    let field_names: Vec<_> = fields.named.iter().map(|f| &f.ident).collect();
                    quote! {
                        Self::#variant_name { #(#field_names),* } => {
                            crate::encoding::Encode::encode(&#idx, out);
                            #( crate::encoding::Encode::encode(#field_names, out); )*
                        }
                    }
                }
            }
        });

    let decode_arms = data_enum
        .variants
        .iter()
        .zip(discriminants.iter())
        .map(|(variant, &idx)| {
            let variant_name = &variant.ident;
            match &variant.fields {
                Fields::Unit => quote! {
                    #idx => Ok(Self::#variant_name),
                },
                Fields::Unnamed(fields) => {
                    let decode_fields = (0..fields.unnamed.len()).map(|_| {
                        quote! { crate::encoding::Decode::decode(input)?, }
                    });
                    quote! {
                        #idx => Ok(Self::#variant_name(#(#decode_fields)*)),
                    }
                }
                Fields::Named(fields) => {
                    let decode_fields = fields.named.iter().map(|f| {
                        let field_name = &f.ident;
                        quote! { #field_name: crate::encoding::Decode::decode(input)?, }
                    });
                    quote! {
                        #idx => Ok(Self::#variant_name { #(#decode_fields)* }),
                    }
                }
            }
        });

    let encode = quote! {
        match self {
            #(#encode_arms)*
        }
    };
    let decode = quote! {
        let variant_idx: u8 = crate::encoding::Decode::decode(input)?;
        match variant_idx {
            #(#decode_arms)*
            _ => Err(crate::encoding::DecodeError::InvalidValue),
        }
    };

    (encode, decode)
}

/// Computes discriminant values for each enum variant, following Rust's
/// rules: explicit value if given, else previous + 1, first defaults to 0.
fn compute_discriminants(data_enum: &DataEnum) -> Vec<u8> {
    let mut discriminants = Vec::with_capacity(data_enum.variants.len());
    let mut next_discriminant: u8 = 0;

    for variant in &data_enum.variants {
        let discriminant = if let Some((_, expr)) = &variant.discriminant {
            parse_discriminant_expr(expr)
        } else {
            next_discriminant
        };

        discriminants.push(discriminant);
        next_discriminant = discriminant.wrapping_add(1);
    }

    discriminants
}

/// Parses a discriminant expression to extract its u8 value.
///
/// Supports integer literals. Panics on unsupported expressions.
fn parse_discriminant_expr(expr: &syn::Expr) -> u8 {
    match expr {
        syn::Expr::Lit(expr_lit) => match &expr_lit.lit {
            syn::Lit::Int(lit_int) => lit_int
                .base10_parse::<u8>()
                .expect("discriminant must be a valid u8"),
            _ => panic!("discriminant must be an integer literal"),
        },
        _ => panic!("discriminant must be a simple integer literal"),
    }
}
