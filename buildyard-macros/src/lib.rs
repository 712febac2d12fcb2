use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Attribute, Data, DeriveInput, Lit};

const KINDS: [(&str, &str); 4] = [
    ("plan", "Plan"),
    ("buildtask", "Buildtask"),
    ("frontend", "Frontend"),
    ("backend", "Backend"),
];

#[proc_macro_derive(BuiltinModule, attributes(module))]
pub fn derive_builtin_module(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    if !matches!(input.data, Data::Struct(_)) {
        return syn::Error::new_spanned(&input.ident, "BuiltinModule only supports structs")
            .to_compile_error()
            .into();
    }

    // Extract module metadata from #[module(...)]
    let meta = match extract_module_meta(&input) {
        Ok(meta) => meta,
        Err(err) => return err.to_compile_error().into(),
    };

    let kind_variant = match KINDS.iter().find(|(name, _)| *name == meta.kind) {
        Some((_, variant)) => syn::Ident::new(variant, proc_macro2::Span::call_site()),
        None => {
            return syn::Error::new_spanned(
                &input.ident,
                format!(
                    "unknown module kind '{}' (expected plan, buildtask, frontend or backend)",
                    meta.kind
                ),
            )
            .to_compile_error()
            .into()
        }
    };

    let struct_name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    let module_id = &meta.id;
    // Name defaults to the id
    let module_name = meta.name.as_ref().unwrap_or(&meta.id);
    let description = match &meta.description {
        Some(desc) => quote! { Some(#desc.to_string()) },
        None => quote! { None },
    };

    let expanded = quote! {
        impl #impl_generics buildyard_sdk::ModuleDefinition for #struct_name #ty_generics #where_clause {
            fn descriptor() -> buildyard_sdk::ModuleDescriptor {
                buildyard_sdk::ModuleDescriptor {
                    id: #module_id.to_string(),
                    kind: buildyard_sdk::ModuleKind::#kind_variant,
                    name: #module_name.to_string(),
                    path: buildyard_sdk::BUILTIN_PATH.to_string(),
                    description: #description,
                }
            }
        }
    };

    TokenStream::from(expanded)
}

struct ModuleMeta {
    id: String,
    kind: String,
    name: Option<String>,
    description: Option<String>,
}

fn extract_module_meta(input: &DeriveInput) -> syn::Result<ModuleMeta> {
    let attr = find_module_attr(&input.attrs).ok_or_else(|| {
        syn::Error::new_spanned(&input.ident, "missing #[module(id = \"...\", kind = \"...\")] attribute")
    })?;

    let mut id = None;
    let mut kind = None;
    let mut name = None;
    let mut description = None;

    attr.parse_nested_meta(|meta| {
        let value = meta.value()?;
        let lit: Lit = value.parse()?;
        let text = match lit {
            Lit::Str(s) => s.value(),
            other => return Err(syn::Error::new_spanned(other, "expected a string literal")),
        };

        if meta.path.is_ident("id") {
            id = Some(text);
        } else if meta.path.is_ident("kind") {
            kind = Some(text);
        } else if meta.path.is_ident("name") {
            name = Some(text);
        } else if meta.path.is_ident("description") {
            description = Some(text);
        } else {
            return Err(meta.error("unsupported module attribute"));
        }
        Ok(())
    })?;

    let id = id.ok_or_else(|| syn::Error::new_spanned(attr, "module id is required"))?;
    let kind = kind.ok_or_else(|| syn::Error::new_spanned(attr, "module kind is required"))?;

    Ok(ModuleMeta {
        id,
        kind,
        name,
        description,
    })
}

fn find_module_attr(attrs: &[Attribute]) -> Option<&Attribute> {
    attrs.iter().find(|attr| attr.path().is_ident("module"))
}
