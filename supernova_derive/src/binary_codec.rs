//! Derive macro for automatic binary serialization.
//!
//! Generates `Encode` and `Decode` implementations for structs. Fields are
//! serialized in declaration order with no padding or alignment inserted by
//! the codec itself; fixed-width integers are little-endian and arrays are
//! written element by element. This makes a `#[derive(BinaryCodec)]` struct
//! a byte-exact description of its wire layout, which is what the executable
//! image headers rely on.
//!
//! # Supported Types
//!
//! - **Named structs**: `struct Header { magic: u64, version: u64 }`
//! - **Tuple structs**: `struct Word(u64)`
//! - **Unit structs**: `struct Marker`
//!
//! Enums and unions are not supported; nothing in the image format is a
//! tagged union at the byte level.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Fields};

/// Derives `Encode` and `Decode` for a struct.
///
/// # Example
///
/// ```ignore
/// use supernova_derive::BinaryCodec;
///
/// #[derive(BinaryCodec)]
/// pub struct MainHeader {
///     pub magic: u64,
///     pub version: u64,
/// }
/// ```
///
/// # Generated Code
///
/// ```ignore
/// impl Encode for MainHeader {
///     fn encode<S: EncodeSink>(&self, out: &mut S) {
///         self.magic.encode(out);
///         self.version.encode(out);
///     }
/// }
///
/// impl Decode for MainHeader {
///     fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
///         Ok(Self {
///             magic: u64::decode(input)?,
///             version: u64::decode(input)?,
///         })
///     }
/// }
/// ```
pub fn derive_binary_codec(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let expanded = match &input.data {
        Data::Struct(data_struct) => match &data_struct.fields {
            Fields::Named(fields) => {
                generate_named_struct_impl(name, &impl_generics, &ty_generics, where_clause, fields)
            }
            Fields::Unnamed(fields) => {
                generate_tuple_struct_impl(name, &impl_generics, &ty_generics, where_clause, fields)
            }
            Fields::Unit => {
                generate_unit_struct_impl(name, &impl_generics, &ty_generics, where_clause)
            }
        },
        Data::Enum(_) | Data::Union(_) => {
            syn::Error::new_spanned(&input, "BinaryCodec derive supports only structs")
                .to_compile_error()
        }
    };

    TokenStream::from(expanded)
}

/// Generates `Encode` and `Decode` for named-field structs.
fn generate_named_struct_impl(
    name: &syn::Ident,
    impl_generics: &syn::ImplGenerics,
    ty_generics: &syn::TypeGenerics,
    where_clause: Option<&syn::WhereClause>,
    fields: &syn::FieldsNamed,
) -> proc_macro2::TokenStream {
    let field_names: Vec<_> = fields.named.iter().map(|f| &f.ident).collect();

    let encode_fields = field_names.iter().map(|name| {
        quote! {
            crate::types::encoding::Encode::encode(&self.#name, out);
        }
    });

    let decode_fields = field_names.iter().map(|name| {
        quote! {
            #name: crate::types::encoding::Decode::decode(input)?,
        }
    });

    quote! {
        impl #impl_generics crate::types::encoding::Encode for #name #ty_generics #where_clause {
            fn encode<S: crate::types::encoding::EncodeSink>(&self, out: &mut S) {
                #(#encode_fields)*
            }
        }

        impl #impl_generics crate::types::encoding::Decode for #name #ty_generics #where_clause {
            fn decode(input: &mut &[u8]) -> ::std::result::Result<Self, crate::types::encoding::DecodeError> {
                Ok(Self {
                    #(#decode_fields)*
                })
            }
        }
    }
}

/// Generates `Encode` and `Decode` for tuple structs.
///
/// Fields are accessed by index (`self.0`, `self.1`), the common case being
/// newtype wrappers around a single word.
fn generate_tuple_struct_impl(
    name: &syn::Ident,
    impl_generics: &syn::ImplGenerics,
    ty_generics: &syn::TypeGenerics,
    where_clause: Option<&syn::WhereClause>,
    fields: &syn::FieldsUnnamed,
) -> proc_macro2::TokenStream {
    let field_indices: Vec<_> = (0..fields.unnamed.len()).map(syn::Index::from).collect();

    let encode_fields = field_indices.iter().map(|idx| {
        quote! {
            crate::types::encoding::Encode::encode(&self.#idx, out);
        }
    });

    let decode_fields = field_indices.iter().map(|_| {
        quote! {
            crate::types::encoding::Decode::decode(input)?,
        }
    });

    quote! {
        impl #impl_generics crate::types::encoding::Encode for #name #ty_generics #where_clause {
            fn encode<S: crate::types::encoding::EncodeSink>(&self, out: &mut S) {
                #(#encode_fields)*
            }
        }

        impl #impl_generics crate::types::encoding::Decode for #name #ty_generics #where_clause {
            fn decode(input: &mut &[u8]) -> ::std::result::Result<Self, crate::types::encoding::DecodeError> {
                Ok(Self(
                    #(#decode_fields)*
                ))
            }
        }
    }
}

/// Generates `Encode` and `Decode` for unit structs.
///
/// Encoding writes nothing; decoding just returns `Self`.
fn generate_unit_struct_impl(
    name: &syn::Ident,
    impl_generics: &syn::ImplGenerics,
    ty_generics: &syn::TypeGenerics,
    where_clause: Option<&syn::WhereClause>,
) -> proc_macro2::TokenStream {
    quote! {
        impl #impl_generics crate::types::encoding::Encode for #name #ty_generics #where_clause {
            fn encode<S: crate::types::encoding::EncodeSink>(&self, _out: &mut S) {}
        }

        impl #impl_generics crate::types::encoding::Decode for #name #ty_generics #where_clause {
            fn decode(_input: &mut &[u8]) -> ::std::result::Result<Self, crate::types::encoding::DecodeError> {
                Ok(Self)
            }
        }
    }
}
