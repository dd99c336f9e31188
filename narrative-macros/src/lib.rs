//! Proc macros for narrative payload schemas.
//!
//! Provides `#[derive(Schema)]`, which generates a JSON schema for a payload
//! struct so the narrative-generation capability can be told exactly what
//! shape of answer to produce.
//!
//! # Example
//!
//! ```ignore
//! /// A follow-up change to the world.
//! #[derive(Schema, Deserialize)]
//! struct Consequence {
//!     /// Dot-separated property path to change
//!     path: String,
//!     /// The new value for that path
//!     value: serde_json::Value,
//!     /// Why this happens
//!     description: Option<String>,
//! }
//! ```
//!
//! The generated impl targets `::narrative_core::narrator::ResponseSchema`.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, DeriveInput, Field, Lit, LitStr, Meta, Type};

/// Derive macro for generating `ResponseSchema` implementations.
///
/// # Attributes
///
/// - `#[schema(name = "...")]` - Override the schema name (defaults to snake_case struct name)
/// - `#[schema(optional)]` on fields - Mark field as not required in the schema
/// - `#[schema(rename = "...")]` on fields - Override field name in the schema
#[proc_macro_derive(Schema, attributes(schema))]
pub fn derive_schema(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_schema(input)
        .unwrap_or_else(|err| err.to_compile_error())
        .into()
}

#[derive(Default)]
struct FieldOptions {
    rename: Option<String>,
    optional: bool,
}

fn expand_schema(input: DeriveInput) -> syn::Result<TokenStream2> {
    let struct_name = &input.ident;
    let schema_name = get_schema_name(&input)?;
    let description = get_doc_comment(&input.attrs);

    let fields = match &input.data {
        syn::Data::Struct(data) => match &data.fields {
            syn::Fields::Named(named) => &named.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    &input,
                    "Schema derive only supports structs with named fields",
                ))
            }
        },
        _ => return Err(syn::Error::new_spanned(&input, "Schema derive only supports structs")),
    };

    let mut property_tokens = Vec::new();
    let mut required_fields = Vec::new();

    for field in fields {
        let options = get_field_options(field)?;
        let field_name = match options.rename {
            Some(ref name) => name.clone(),
            None => field
                .ident
                .as_ref()
                .map(|ident| ident.to_string().trim_start_matches("r#").to_string())
                .ok_or_else(|| syn::Error::new_spanned(field, "expected a named field"))?,
        };
        let field_desc = get_doc_comment(&field.attrs);
        let type_schema = type_to_schema(&field.ty);

        let desc_token = if field_desc.is_empty() {
            quote! {}
        } else {
            quote! {
                if let ::serde_json::Value::Object(ref mut map) = property {
                    map.insert("description".to_string(), ::serde_json::json!(#field_desc));
                }
            }
        };

        property_tokens.push(quote! {
            {
                #[allow(unused_mut)]
                let mut property = #type_schema;
                #desc_token
                properties.insert(#field_name.to_string(), property);
            }
        });

        if !options.optional && !is_option_type(&field.ty) {
            required_fields.push(field_name);
        }
    }

    let description_token = if description.is_empty() {
        quote! {}
    } else {
        quote! {
            schema["description"] = ::serde_json::json!(#description);
        }
    };

    Ok(quote! {
        impl ::narrative_core::narrator::ResponseSchema for #struct_name {
            fn schema_name() -> &'static str {
                #schema_name
            }

            fn response_schema() -> ::serde_json::Value {
                let mut properties = ::serde_json::Map::new();
                #(#property_tokens)*

                let required: Vec<&str> = vec![#(#required_fields),*];

                let mut schema = ::serde_json::json!({
                    "type": "object",
                    "properties": properties,
                    "required": required
                });
                #description_token
                schema
            }
        }
    })
}

fn get_schema_name(input: &DeriveInput) -> syn::Result<String> {
    for attr in &input.attrs {
        if attr.path().is_ident("schema") {
            let meta = attr.parse_args::<Meta>()?;
            if let Meta::NameValue(nv) = meta {
                if nv.path.is_ident("name") {
                    if let syn::Expr::Lit(expr_lit) = &nv.value {
                        if let Lit::Str(s) = &expr_lit.lit {
                            return Ok(s.value());
                        }
                    }
                }
            }
        }
    }

    Ok(to_snake_case(&input.ident.to_string()))
}

fn get_field_options(field: &Field) -> syn::Result<FieldOptions> {
    let mut options = FieldOptions::default();
    for attr in &field.attrs {
        if !attr.path().is_ident("schema") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("rename") {
                let value: LitStr = meta.value()?.parse()?;
                options.rename = Some(value.value());
                Ok(())
            } else if meta.path.is_ident("optional") {
                options.optional = true;
                Ok(())
            } else {
                Err(meta.error("unsupported schema attribute"))
            }
        })?;
    }
    Ok(options)
}

fn get_doc_comment(attrs: &[syn::Attribute]) -> String {
    let mut docs = Vec::new();
    for attr in attrs {
        if attr.path().is_ident("doc") {
            if let Meta::NameValue(nv) = &attr.meta {
                if let syn::Expr::Lit(expr_lit) = &nv.value {
                    if let Lit::Str(s) = &expr_lit.lit {
                        let line = s.value().trim().to_string();
                        if !line.is_empty() {
                            docs.push(line);
                        }
                    }
                }
            }
        }
    }
    docs.join(" ")
}

fn is_option_type(ty: &Type) -> bool {
    if let Type::Path(type_path) = ty {
        if let Some(segment) = type_path.path.segments.last() {
            return segment.ident == "Option";
        }
    }
    false
}

/// Last generic type argument of a path segment, e.g. `V` in `BTreeMap<K, V>`.
fn last_type_argument(segment: &syn::PathSegment) -> Option<&Type> {
    if let syn::PathArguments::AngleBracketed(args) = &segment.arguments {
        return args.args.iter().rev().find_map(|arg| match arg {
            syn::GenericArgument::Type(inner) => Some(inner),
            _ => None,
        });
    }
    None
}

fn type_to_schema(ty: &Type) -> TokenStream2 {
    let Type::Path(type_path) = ty else {
        return quote! { ::serde_json::json!({}) };
    };
    let Some(segment) = type_path.path.segments.last() else {
        return quote! { ::serde_json::json!({}) };
    };

    match segment.ident.to_string().as_str() {
        "String" | "str" => quote! { ::serde_json::json!({"type": "string"}) },
        "i8" | "i16" | "i32" | "i64" | "isize" | "u8" | "u16" | "u32" | "u64" | "usize" => {
            quote! { ::serde_json::json!({"type": "integer"}) }
        }
        "f32" | "f64" => quote! { ::serde_json::json!({"type": "number"}) },
        "bool" => quote! { ::serde_json::json!({"type": "boolean"}) },
        "Value" => quote! { ::serde_json::json!({}) },
        "Map" => quote! { ::serde_json::json!({"type": "object"}) },
        "Option" | "Box" => match last_type_argument(segment) {
            Some(inner) => type_to_schema(inner),
            None => quote! { ::serde_json::json!({}) },
        },
        "Vec" | "VecDeque" => match last_type_argument(segment) {
            Some(inner) => {
                let inner_schema = type_to_schema(inner);
                quote! {
                    ::serde_json::json!({
                        "type": "array",
                        "items": #inner_schema
                    })
                }
            }
            None => quote! { ::serde_json::json!({"type": "array"}) },
        },
        "HashMap" | "BTreeMap" => match last_type_argument(segment) {
            Some(inner) => {
                let inner_schema = type_to_schema(inner);
                quote! {
                    ::serde_json::json!({
                        "type": "object",
                        "additionalProperties": #inner_schema
                    })
                }
            }
            None => quote! { ::serde_json::json!({"type": "object"}) },
        },
        // Nested payload types describe themselves.
        _ => quote! { <#ty as ::narrative_core::narrator::ResponseSchema>::response_schema() },
    }
}

fn to_snake_case(s: &str) -> String {
    let mut result = String::new();
    for (i, c) in s.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                result.push('_');
            }
            result.push(c.to_ascii_lowercase());
        } else {
            result.push(c);
        }
    }
    result
}
