//! Derive macros for the starfield particle pipeline.
//!
//! This crate provides one derive macro:
//!
//! - [`Record`] - Generates the layout descriptor shared by host seeding code,
//!   the compute kernel and the vertex-assembly stage
//!
//! # Usage
//!
//! The macro is re-exported from the main `starfield` crate. You don't need
//! to add this crate directly:
//!
//! ```ignore
//! use starfield::prelude::*;
//!
//! #[repr(C)]
//! #[derive(Record, Clone, Copy, Pod, Zeroable)]
//! struct Star {
//!     #[vertex(location = 0)]
//!     position_radius: [f32; 4],
//!     velocity_pad: [f32; 4],
//!     #[vertex(location = 1)]
//!     color: [f32; 4],
//! }
//! ```
//!
//! # Layout Guarantees
//!
//! Offsets are taken from the Rust struct with `core::mem::offset_of!`, and
//! the generated WGSL struct lists the same fields in the same order. The
//! macro also emits compile-time assertions that every field offset and the
//! total size satisfy WGSL's alignment rules, so a struct that would be laid
//! out differently on the host and in a shader fails to build instead of
//! silently corrupting data.
//!
//! Supported field types:
//! - `f32`, `u32`
//! - `[f32; 2]`, `[f32; 4]`, `[u32; 2]`, `[u32; 4]`
//! - `Vec2`, `Vec4` (glam)
//!
//! Three-component vectors are rejected: WGSL aligns `vec3` to 16 bytes while
//! Rust aligns `[f32; 3]` to 4, which is exactly the drift this crate exists
//! to prevent. Use a four-component field and leave the last lane unused.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Expr, ExprLit, Fields, Lit, LitInt, Meta, Type};

/// Derive macro for fixed-layout particle records.
///
/// # Generated Items
///
/// For a struct `Star`:
///
/// - `impl starfield::RecordLayout for Star` with `NAME`, `FIELDS` and
///   `WGSL_STRUCT`
/// - const assertions on field alignment and total size
///
/// # Attributes
///
/// - `#[vertex(location = N)]` marks a field as a vertex attribute read by
///   the render stage at shader location `N`. Unmarked fields are skipped by
///   vertex assembly.
///
/// # Requirements
///
/// - Must be a struct with named fields
/// - Must be `#[repr(C)]`
/// - Vertex locations must be unique
#[proc_macro_derive(Record, attributes(vertex))]
pub fn derive_record(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;
    let name_str = name.to_string();

    if !is_repr_c(&input) {
        return syn::Error::new_spanned(name, "Record derive requires #[repr(C)]")
            .to_compile_error()
            .into();
    }

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return syn::Error::new_spanned(name, "Record derive only supports structs with named fields")
                    .to_compile_error()
                    .into()
            }
        },
        _ => {
            return syn::Error::new_spanned(name, "Record derive only supports structs")
                .to_compile_error()
                .into()
        }
    };

    let mut descriptors = Vec::new();
    let mut wgsl_fields = Vec::new();
    let mut alignment_checks = Vec::new();
    let mut locations: Vec<u32> = Vec::new();
    let mut max_align = 4u32;

    for field in fields.iter() {
        let Some(field_name) = field.ident.as_ref() else {
            continue;
        };
        let field_name_str = field_name.to_string();

        let info = match field_type_info(&field.ty) {
            Ok(info) => info,
            Err(msg) => return syn::Error::new_spanned(&field.ty, msg).to_compile_error().into(),
        };

        let location = match vertex_location(field) {
            Ok(location) => location,
            Err(err) => return err.to_compile_error().into(),
        };
        if let Some(loc) = location {
            if locations.contains(&loc) {
                return syn::Error::new_spanned(field, format!("vertex location {} is used twice", loc))
                    .to_compile_error()
                    .into();
            }
            locations.push(loc);
        }

        max_align = max_align.max(info.align);

        let scalars = info.scalars;
        let kind = if info.unsigned {
            quote! { ::starfield::ScalarKind::Uint }
        } else {
            quote! { ::starfield::ScalarKind::Float }
        };
        let location_expr = match location {
            Some(loc) => quote! { Some(#loc) },
            None => quote! { None },
        };

        descriptors.push(quote! {
            ::starfield::FieldDesc {
                name: #field_name_str,
                offset: ::core::mem::offset_of!(#name, #field_name) as u32,
                scalars: #scalars,
                kind: #kind,
                location: #location_expr,
            }
        });

        wgsl_fields.push(format!("    {}: {},", field_name_str, info.wgsl_type));

        let align = info.align as usize;
        let msg = format!(
            "{}.{} is not {}-byte aligned; the WGSL struct would place it at a different offset",
            name_str, field_name_str, align
        );
        alignment_checks.push(quote! {
            assert!(::core::mem::offset_of!(#name, #field_name) % #align == 0, #msg);
        });
    }

    if descriptors.is_empty() {
        return syn::Error::new_spanned(name, "Record derive needs at least one field")
            .to_compile_error()
            .into();
    }

    let wgsl_struct = format!("struct {} {{\n{}\n}}", name_str, wgsl_fields.join("\n"));
    let max_align = max_align as usize;
    let size_msg = format!(
        "size of {} is not a multiple of {}; WGSL array stride would differ",
        name_str, max_align
    );

    let expanded = quote! {
        const _: () = {
            #(#alignment_checks)*
            assert!(::core::mem::size_of::<#name>() % #max_align == 0, #size_msg);
        };

        impl ::starfield::RecordLayout for #name {
            const NAME: &'static str = #name_str;
            const FIELDS: &'static [::starfield::FieldDesc] = &[
                #(#descriptors),*
            ];
            const WGSL_STRUCT: &'static str = #wgsl_struct;
        }
    };

    TokenStream::from(expanded)
}

/// Layout metadata for a supported field type.
struct TypeInfo {
    /// WGSL type name (e.g., "vec4<f32>")
    wgsl_type: String,
    /// Number of 4-byte scalars
    scalars: u32,
    /// Alignment WGSL requires for this type
    align: u32,
    unsigned: bool,
}

fn field_type_info(ty: &Type) -> Result<TypeInfo, String> {
    if let Type::Array(array) = ty {
        let elem = &array.elem;
        let elem_str = quote!(#elem).to_string().replace(' ', "");
        let unsigned = match elem_str.as_str() {
            "f32" => false,
            "u32" => true,
            other => return Err(format!("unsupported array element type `{}`; use f32 or u32", other)),
        };
        let len = match &array.len {
            Expr::Lit(ExprLit { lit: Lit::Int(n), .. }) => n.base10_parse::<u32>().map_err(|e| e.to_string())?,
            _ => return Err("array length must be an integer literal".to_string()),
        };
        return vector_info(len, unsigned);
    }

    let type_str = quote!(#ty).to_string().replace(' ', "");
    match type_str.as_str() {
        "f32" => vector_info(1, false),
        "u32" => vector_info(1, true),
        "Vec2" | "glam::Vec2" => vector_info(2, false),
        "Vec4" | "glam::Vec4" => vector_info(4, false),
        "Vec3" | "glam::Vec3" => vector_info(3, false),
        other => Err(format!("unsupported type in Record struct: `{}`", other)),
    }
}

fn vector_info(len: u32, unsigned: bool) -> Result<TypeInfo, String> {
    let scalar = if unsigned { "u32" } else { "f32" };
    let (wgsl_type, align) = match len {
        1 => (scalar.to_string(), 4),
        2 => (format!("vec2<{}>", scalar), 8),
        4 => (format!("vec4<{}>", scalar), 16),
        3 => {
            return Err("three-component vectors are 16-byte aligned in WGSL but 4-byte aligned on the host; \
                 use a four-component field and leave the last lane unused"
                .to_string())
        }
        n => return Err(format!("unsupported vector length {}", n)),
    };
    Ok(TypeInfo {
        wgsl_type,
        scalars: len,
        align,
        unsigned,
    })
}

fn vertex_location(field: &syn::Field) -> syn::Result<Option<u32>> {
    let mut location = None;
    for attr in &field.attrs {
        if !attr.path().is_ident("vertex") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("location") {
                let lit: LitInt = meta.value()?.parse()?;
                location = Some(lit.base10_parse::<u32>()?);
                Ok(())
            } else {
                Err(meta.error("expected `location = N`"))
            }
        })?;
        if location.is_none() {
            return Err(syn::Error::new_spanned(attr, "#[vertex] needs `location = N`"));
        }
    }
    Ok(location)
}

fn is_repr_c(input: &DeriveInput) -> bool {
    input.attrs.iter().any(|attr| {
        if !attr.path().is_ident("repr") {
            return false;
        }
        match &attr.meta {
            Meta::List(list) => list
                .tokens
                .to_string()
                .split(',')
                .any(|part| part.trim() == "C"),
            _ => false,
        }
    })
}
