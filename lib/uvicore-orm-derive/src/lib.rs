use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, Lit, parse_macro_input};

/// Convert CamelCase to snake_case
fn to_snake_case(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 4);

    for (i, c) in s.chars().enumerate() {
        if c.is_ascii_uppercase() {
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

/// Check if a field has a specific attribute
fn has_attr(field: &syn::Field, attr_name: &str) -> bool {
    field
        .attrs
        .iter()
        .any(|attr| attr.path().is_ident(attr_name))
}

/// Check if a field has #[column(skip)]
fn has_column_skip(field: &syn::Field) -> bool {
    for attr in &field.attrs {
        if attr.path().is_ident("column") {
            let mut skip = false;
            let _ = attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("skip") {
                    skip = true;
                }
                Ok(())
            });
            if skip {
                return true;
            }
        }
    }
    false
}

/// Get the serde name from #[serde(rename = "...")] or None
fn get_serde_rename(field: &syn::Field) -> Option<String> {
    for attr in &field.attrs {
        if attr.path().is_ident("serde") {
            let mut name = None;
            let _ = attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("rename") {
                    meta.input.parse::<syn::Token![=]>()?;
                    let lit: Lit = meta.input.parse()?;
                    if let Lit::Str(s) = lit {
                        name = Some(s.value());
                    }
                } else if meta.input.peek(syn::Token![=]) {
                    // Skip values of other serde options (default = "...", with = "...").
                    meta.input.parse::<syn::Token![=]>()?;
                    let _: syn::Expr = meta.input.parse()?;
                }
                Ok(())
            });
            if name.is_some() {
                return name;
            }
        }
    }
    None
}

/// Parse #[model(entity = "...")] attribute and return the entity name
fn parse_model_attr(input: &DeriveInput) -> Option<String> {
    for attr in &input.attrs {
        if attr.path().is_ident("model") {
            let mut entity = None;
            let _ = attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("entity") {
                    meta.input.parse::<syn::Token![=]>()?;
                    let lit: Lit = meta.input.parse()?;
                    if let Lit::Str(s) = lit {
                        entity = Some(s.value());
                    }
                }
                Ok(())
            });
            return entity;
        }
    }
    None
}

/// Derive macro for the Model trait
///
/// Binds a serde struct to a registered entity. The entity name comes from
/// `#[model(entity = "...")]`, or the struct name in snake_case.
///
/// ## Field attributes
///
/// - `#[relation]` - the field holds related models (a relation key)
/// - `#[column(skip)]` - the field is not part of the entity
///
/// Field names follow `#[serde(rename = "...")]` when present.
///
/// ## Example
///
/// ```text
/// #[derive(Model, Serialize, Deserialize, Clone)]
/// #[model(entity = "post")]
/// struct Post {
///     pub id: Option<i64>,
///     pub title: String,
///     #[relation]
///     #[serde(default, skip_serializing_if = "Option::is_none")]
///     pub comments: Option<Vec<Comment>>,
/// }
/// ```
#[proc_macro_derive(Model, attributes(model, relation, column))]
pub fn derive_model(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;
    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return syn::Error::new_spanned(name, "Model only supports structs with named fields")
                    .to_compile_error()
                    .into();
            }
        },
        _ => {
            return syn::Error::new_spanned(name, "Model only supports structs")
                .to_compile_error()
                .into();
        }
    };

    let entity_name =
        parse_model_attr(&input).unwrap_or_else(|| to_snake_case(&name.to_string()));

    let mut field_names = Vec::new();
    let mut relation_names = Vec::new();
    for field in fields.iter() {
        if has_column_skip(field) {
            continue;
        }
        let Some(ident) = field.ident.as_ref() else {
            continue;
        };
        let field_name = get_serde_rename(field).unwrap_or_else(|| ident.to_string());
        if has_attr(field, "relation") {
            relation_names.push(field_name);
        } else {
            field_names.push(field_name);
        }
    }

    let field_literals: Vec<_> = field_names.iter().map(|s| s.as_str()).collect();
    let relation_literals: Vec<_> = relation_names.iter().map(|s| s.as_str()).collect();

    let expanded = quote! {
        impl uvicore_orm::Model for #name {
            fn entity_name() -> &'static str {
                #entity_name
            }

            fn field_names() -> &'static [&'static str] {
                &[#(#field_literals),*]
            }

            fn relation_names() -> &'static [&'static str] {
                &[#(#relation_literals),*]
            }
        }
    };

    TokenStream::from(expanded)
}
