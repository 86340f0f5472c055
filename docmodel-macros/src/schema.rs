use proc_macro2::TokenStream;
use quote::{format_ident, quote, quote_spanned};
use syn::{Data, DeriveInput, Expr, Fields, LitStr, ext::IdentExt, spanned::Spanned};

#[derive(Default)]
struct FieldAttrs {
    key: Option<LitStr>,
    default: Option<Expr>,
    auto_now: bool,
    auto_now_on_create: bool,
    sequence: Option<LitStr>,
    skip: bool,
}

fn parse_model_attrs(input: &DeriveInput) -> syn::Result<Option<LitStr>> {
    let mut collection = None;
    for attr in input.attrs.iter().filter(|attr| attr.path().is_ident("model")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("collection") {
                collection = Some(meta.value()?.parse::<LitStr>()?);
                Ok(())
            } else {
                Err(meta.error("unsupported model attribute"))
            }
        })?;
    }
    Ok(collection)
}

fn parse_field_attrs(field: &syn::Field) -> syn::Result<FieldAttrs> {
    let mut attrs = FieldAttrs::default();
    for attr in field.attrs.iter().filter(|attr| attr.path().is_ident("field")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("key") {
                attrs.key = Some(meta.value()?.parse()?);
            } else if meta.path.is_ident("default") {
                attrs.default = Some(meta.value()?.parse()?);
            } else if meta.path.is_ident("auto_now") {
                attrs.auto_now = true;
            } else if meta.path.is_ident("auto_now_on_create") {
                attrs.auto_now_on_create = true;
            } else if meta.path.is_ident("sequence") {
                attrs.sequence = Some(meta.value()?.parse()?);
            } else if meta.path.is_ident("skip") {
                attrs.skip = true;
            } else {
                return Err(meta.error("unsupported field attribute"));
            }
            Ok(())
        })?;
    }

    if attrs.auto_now && attrs.auto_now_on_create {
        return Err(syn::Error::new_spanned(
            field,
            "auto_now and auto_now_on_create are mutually exclusive",
        ));
    }
    Ok(attrs)
}

pub(crate) fn expand(input: DeriveInput) -> syn::Result<TokenStream> {
    let name = &input.ident;

    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.generics,
            "Schema cannot be derived for generic types",
        ));
    }

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    name,
                    "Schema derive only supports structs with named fields",
                ));
            }
        },
        _ => return Err(syn::Error::new_spanned(name, "Schema derive only supports structs")),
    };

    let collection = match parse_model_attrs(&input)? {
        Some(collection) => quote! { ::core::option::Option::Some(#collection) },
        None => quote! { ::core::option::Option::None },
    };

    let mut accessors = Vec::new();
    let mut descriptors = Vec::new();
    let mut identifier = TokenStream::new();
    for field in fields {
        let attrs = parse_field_attrs(field)?;
        if attrs.skip {
            continue;
        }

        let Some(ident) = field.ident.as_ref() else {
            continue;
        };
        let ty = &field.ty;
        let field_name = ident.unraw().to_string();
        let view = format_ident!("__view_{}", field_name);
        let slot = format_ident!("__slot_{}", field_name);

        accessors.push(quote! {
            fn #view(model: &#name) -> &dyn ::docmodel::field::Slot {
                &model.#ident
            }
            fn #slot(model: &mut #name) -> &mut dyn ::docmodel::field::Slot {
                &mut model.#ident
            }
        });

        let mut descriptor = quote! {
            ::docmodel::field::Field::new::<#ty>(#field_name, #view, #slot)
        };
        if let Some(key) = &attrs.key {
            descriptor = quote! { #descriptor.with_key(#key) };
        }
        if let Some(default) = &attrs.default {
            descriptor = quote_spanned! {default.span()=>
                #descriptor.with_typed_default::<#ty, _>(#default)
            };
        }
        if attrs.auto_now {
            descriptor = quote! { #descriptor.auto_now() };
        }
        if attrs.auto_now_on_create {
            descriptor = quote! { #descriptor.auto_now_on_create() };
        }
        if let Some(sequence) = &attrs.sequence {
            descriptor = quote! { #descriptor.sequence(#sequence) };
        }
        descriptors.push(descriptor);

        if field_name == "id" {
            identifier = quote_spanned! {ty.span()=>
                impl ::docmodel::schema::HasIdentifier for #name {}

                const _: () = {
                    #[allow(dead_code)]
                    fn identifier(model: &#name) -> &::core::option::Option<::docmodel::bson::oid::ObjectId> {
                        &model.#ident
                    }
                };
            };
        }
    }

    let type_name = name.unraw().to_string();

    Ok(quote! {
        impl ::docmodel::schema::Schema for #name {
            fn schema() -> &'static ::docmodel::schema::ModelSchema<Self> {
                static SCHEMA: ::std::sync::OnceLock<::docmodel::schema::ModelSchema<#name>> =
                    ::std::sync::OnceLock::new();

                #(#accessors)*

                SCHEMA.get_or_init(|| {
                    ::docmodel::schema::ModelSchema::register(
                        #type_name,
                        #collection,
                        ::std::vec![#(#descriptors),*],
                    )
                })
            }
        }

        #identifier

        impl ::docmodel::field::Coerce for #name {
            fn kind() -> ::docmodel::field::FieldKind {
                ::docmodel::field::FieldKind::Embedded
            }

            fn to_bson(&self) -> ::docmodel::bson::Bson {
                ::docmodel::bson::Bson::Document(
                    <Self as ::docmodel::schema::Schema>::schema().to_document(self),
                )
            }

            fn coerce(
                _field: &str,
                value: ::docmodel::bson::Bson,
            ) -> ::docmodel::error::DocumentStoreResult<Self> {
                <Self as ::docmodel::schema::Schema>::schema().from_bson(value)
            }
        }
    })
}
