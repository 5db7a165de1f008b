use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{
    Data, DeriveInput, Field, GenericArgument, LitStr, Member, Path, PathArguments, Type,
    parse_macro_input,
};

pub fn bind_derive_impl(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

#[derive(Default)]
struct ContainerAttrs {
    hook: Option<Path>,
    krate: Option<Path>,
}

enum FieldRole {
    Member { name: Option<String> },
    Embed,
    File { form_name: Option<String> },
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let attrs = container_attrs(input)?;
    let krate = attrs
        .krate
        .map(|path| quote!(#path))
        .unwrap_or_else(|| quote!(::bindery_core));

    let fields = match &input.data {
        Data::Struct(data) => &data.fields,
        _ => {
            return Err(syn::Error::new_spanned(
                &input.ident,
                "Bind can only be derived for structs",
            ));
        }
    };

    let mut steps = Vec::new();
    for (index, field) in fields.iter().enumerate() {
        if let Some(role) = field_role(field)? {
            steps.push(describe_step(index, field, role)?);
        }
    }

    let hook = match &attrs.hook {
        Some(path) => quote!(#path(self, req)),
        None => quote! {
            let _ = req;
            ::core::result::Result::Ok(())
        },
    };

    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics #krate::Bind for #name #ty_generics #where_clause {
            fn bind(
                &mut self,
                req: &#krate::HttpRequest,
            ) -> ::core::result::Result<(), #krate::BoxError> {
                #hook
            }

            fn describe(shape: &mut #krate::Shape<Self>) {
                let _ = &shape;
                #(#steps)*
            }
        }
    })
}

fn container_attrs(input: &DeriveInput) -> syn::Result<ContainerAttrs> {
    let mut attrs = ContainerAttrs::default();
    for attr in input.attrs.iter().filter(|a| a.path().is_ident("bind")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("hook") {
                let value: LitStr = meta.value()?.parse()?;
                attrs.hook = Some(value.parse()?);
                Ok(())
            } else if meta.path.is_ident("crate") {
                let value: LitStr = meta.value()?.parse()?;
                attrs.krate = Some(value.parse()?);
                Ok(())
            } else {
                Err(meta.error("expected `hook` or `crate`"))
            }
        })?;
    }
    Ok(attrs)
}

fn field_role(field: &Field) -> syn::Result<Option<FieldRole>> {
    let Some(attr) = field.attrs.iter().find(|a| a.path().is_ident("bind")) else {
        return Ok(None);
    };

    // Bare `#[bind]`.
    if matches!(attr.meta, syn::Meta::Path(_)) {
        return Ok(Some(FieldRole::Member { name: None }));
    }

    let mut role = FieldRole::Member { name: None };
    attr.parse_nested_meta(|meta| {
        if meta.path.is_ident("name") {
            let value: LitStr = meta.value()?.parse()?;
            role = FieldRole::Member {
                name: Some(value.value()),
            };
            Ok(())
        } else if meta.path.is_ident("embed") {
            role = FieldRole::Embed;
            Ok(())
        } else if meta.path.is_ident("file") {
            let form_name = if meta.input.peek(syn::Token![=]) {
                let value: LitStr = meta.value()?.parse()?;
                Some(value.value())
            } else {
                None
            };
            role = FieldRole::File { form_name };
            Ok(())
        } else {
            Err(meta.error("expected `name`, `embed` or `file`"))
        }
    })?;
    Ok(Some(role))
}

fn describe_step(index: usize, field: &Field, role: FieldRole) -> syn::Result<TokenStream2> {
    let (member, default_name) = match &field.ident {
        Some(ident) => (Member::Named(ident.clone()), ident.to_string()),
        None => (Member::Unnamed(index.into()), index.to_string()),
    };

    let step = match role {
        FieldRole::Embed => quote! {
            shape.embed(|v| &mut v.#member);
        },
        FieldRole::Member { name } => {
            let name = name.unwrap_or(default_name);
            match wrapper(&field.ty) {
                Some(("Option", inner)) if wrapper(inner).is_some_and(|(w, _)| w == "Box") => {
                    quote!(shape.optional(#name, |v| v.#member.as_deref_mut());)
                }
                Some(("Option", _)) => quote!(shape.optional(#name, |v| v.#member.as_mut());),
                Some(("Box", _)) => quote!(shape.field(#name, |v| &mut *v.#member);),
                _ => quote!(shape.field(#name, |v| &mut v.#member);),
            }
        }
        FieldRole::File { form_name } => {
            let form_name = form_name.unwrap_or(default_name);
            match wrapper(&field.ty) {
                Some(("Option", _)) => quote!(shape.file(#form_name, |v| &mut v.#member);),
                Some(("Vec", _)) => quote!(shape.files(#form_name, |v| &mut v.#member);),
                _ => {
                    return Err(syn::Error::new_spanned(
                        &field.ty,
                        "file fields must be Option<FileHeader> or Vec<FileHeader>",
                    ));
                }
            }
        }
    };

    Ok(step)
}

/// Splits `Option<T>`, `Box<T>` or `Vec<T>` into the wrapper name and `T`.
fn wrapper(ty: &Type) -> Option<(&'static str, &Type)> {
    let Type::Path(path) = ty else {
        return None;
    };
    let segment = path.path.segments.last()?;
    let name = match segment.ident.to_string().as_str() {
        "Option" => "Option",
        "Box" => "Box",
        "Vec" => "Vec",
        _ => return None,
    };
    let PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    match args.args.first()? {
        GenericArgument::Type(inner) => Some((name, inner)),
        _ => None,
    }
}
