// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hmpi project

extern crate proc_macro;

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Fields};

/// `#[derive(DataLayout)]` macro: generates the layout-resolution impl for
/// a `#[repr(C)]` struct with named fields.
///
/// Field offsets come from `core::mem::offset_of!`, so the committed layout
/// is exactly the layout the compiler uses; `#[repr(C)]` is required
/// because the default representation may reorder fields. Inline fixed-size
/// arrays contribute their flattened element count. A field whose element
/// type has no wire representation makes the whole struct resolve to no
/// descriptor.
///
/// Fields marked `#[layout(skip)]` are excluded from the layout entirely
/// (their type does not need to be describable).
///
/// Example:
/// ```ignore
/// use hmpi::DataLayout;
///
/// #[derive(DataLayout, Clone, Copy)]
/// #[repr(C)]
/// struct Sample {
///     position: [f64; 3],
///     weight: f64,
///     #[layout(skip)]
///     dirty: bool,
/// }
/// ```
#[proc_macro_derive(DataLayout, attributes(layout))]
pub fn derive_data_layout(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;

    if !input.generics.params.is_empty() {
        return syn::Error::new_spanned(
            &input.generics,
            "derive(DataLayout) does not support generic structs",
        )
        .to_compile_error()
        .into();
    }

    if !has_repr_c(&input) {
        return syn::Error::new_spanned(
            &input.ident,
            "derive(DataLayout) requires #[repr(C)]: the default representation \
             may reorder fields, so the described offsets would not match memory",
        )
        .to_compile_error()
        .into();
    }

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(f) => &f.named,
            _ => {
                return syn::Error::new_spanned(&input, "Only named fields are supported")
                    .to_compile_error()
                    .into()
            }
        },
        _ => {
            return syn::Error::new_spanned(&input, "Only structs are supported")
                .to_compile_error()
                .into()
        }
    };

    let mut field_blocks = Vec::new();
    for field in fields {
        let skip = match is_transient(field) {
            Ok(skip) => skip,
            Err(e) => return e.to_compile_error().into(),
        };
        if skip {
            continue;
        }
        let Some(field_name) = field.ident.as_ref() else {
            return syn::Error::new_spanned(field, "Field must have a name")
                .to_compile_error()
                .into();
        };
        let field_type = &field.ty;

        // Element resolution recurses through the registry context; a field
        // with no descriptor fails the whole struct, without error.
        field_blocks.push(quote! {
            {
                let ::core::option::Option::Some(element) =
                    cx.descriptor::<#field_type>()?
                else {
                    return ::core::result::Result::Ok(::core::option::Option::None);
                };
                fields.push(::hmpi::datatype::FieldLayout {
                    offset: ::core::mem::offset_of!(#name, #field_name),
                    count: <#field_type as ::hmpi::datatype::DataLayout>::REPEAT,
                    element,
                });
            }
        });
    }

    let field_count = field_blocks.len();
    let expanded = quote! {
        impl ::hmpi::datatype::DataLayout for #name {
            fn resolve(
                cx: &mut ::hmpi::datatype::LayoutCx<'_>,
            ) -> ::hmpi::datatype::Resolution {
                let mut fields =
                    ::std::vec::Vec::<::hmpi::datatype::FieldLayout>::with_capacity(#field_count);
                #(#field_blocks)*
                cx.struct_layout::<Self>(fields)
            }
        }
    };

    TokenStream::from(expanded)
}

/// Whether the struct carries `#[repr(C)]` (possibly alongside `align`/
/// `packed` modifiers).
fn has_repr_c(input: &DeriveInput) -> bool {
    for attr in &input.attrs {
        if !attr.path().is_ident("repr") {
            continue;
        }
        if let syn::Meta::List(list) = &attr.meta {
            let reprs = list.tokens.to_string();
            if reprs.split(',').any(|r| r.trim() == "C") {
                return true;
            }
        }
    }
    false
}

/// Whether the field is marked `#[layout(skip)]`.
fn is_transient(field: &syn::Field) -> syn::Result<bool> {
    for attr in &field.attrs {
        if !attr.path().is_ident("layout") {
            continue;
        }
        let list = attr.meta.require_list()?;
        if list.tokens.to_string().trim() == "skip" {
            return Ok(true);
        }
        return Err(syn::Error::new_spanned(
            attr,
            "unknown layout attribute; expected #[layout(skip)]",
        ));
    }
    Ok(false)
}
