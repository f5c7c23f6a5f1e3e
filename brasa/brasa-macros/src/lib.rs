extern crate proc_macro;

use heck::ToSnakeCase;
use proc_macro::TokenStream;
use proc_macro2::{Span, TokenTree};
use quote::{quote, ToTokens};
use syn::parse::{Parse, ParseStream};
use syn::punctuated::Punctuated;
use syn::{parse_macro_input, parse_quote, Attribute, Data, DeriveInput, Fields, Ident, ItemFn, LitStr, Result, Token};

/// Marks a type as an API payload.
///
/// Adds `Serialize`, `Deserialize`, `utoipa::ToSchema`, `Debug` and `Clone`,
/// renames fields to camelCase unless `rename_all = "..."` says otherwise, and
/// implements `brasa::InTransform` / `brasa::OutTransform` with their no-op
/// defaults. Pass `in_transform` or `out_transform` to write that impl by hand.
///
/// Fields that mention the type itself (`children: Vec<Category>`) get
/// `#[schema(no_recursion)]` so schema collection terminates. Types that only
/// loop through another type (`Pet` -> `Owner` -> `Pet`) need `no_recursion`
/// passed explicitly on one side.
///
/// ```rust,ignore
/// #[api_dto(in_transform)]
/// pub struct Dosing {
///     pub amount: f64,
///     pub unit: String,
/// }
/// ```
///
/// The calling crate needs `serde` and `utoipa` as direct dependencies.
#[proc_macro_attribute]
pub fn api_dto(args: TokenStream, input: TokenStream) -> TokenStream {
    let args = parse_macro_input!(args as DtoArgs);
    let item = parse_macro_input!(input as DeriveInput);
    expand_api_dto(args, item).into()
}

struct DtoArgs {
    rename_all: Option<LitStr>,
    custom_in: bool,
    custom_out: bool,
    no_recursion: bool,
}

impl Parse for DtoArgs {
    fn parse(input: ParseStream) -> Result<Self> {
        let mut args = DtoArgs {
            rename_all: None,
            custom_in: false,
            custom_out: false,
            no_recursion: false,
        };
        let items = Punctuated::<DtoArg, Token![,]>::parse_terminated(input)?;
        for item in items {
            match item {
                DtoArg::RenameAll(lit) => args.rename_all = Some(lit),
                DtoArg::InTransform => args.custom_in = true,
                DtoArg::OutTransform => args.custom_out = true,
                DtoArg::NoRecursion => args.no_recursion = true,
            }
        }
        Ok(args)
    }
}

enum DtoArg {
    RenameAll(LitStr),
    InTransform,
    OutTransform,
    NoRecursion,
}

impl Parse for DtoArg {
    fn parse(input: ParseStream) -> Result<Self> {
        let key: Ident = input.parse()?;
        match key.to_string().as_str() {
            "rename_all" => {
                input.parse::<Token![=]>()?;
                Ok(DtoArg::RenameAll(input.parse()?))
            }
            "in_transform" => Ok(DtoArg::InTransform),
            "out_transform" => Ok(DtoArg::OutTransform),
            "no_recursion" => Ok(DtoArg::NoRecursion),
            other => Err(syn::Error::new(
                key.span(),
                format!("unknown api_dto option `{other}`; expected rename_all, in_transform, out_transform or no_recursion"),
            )),
        }
    }
}

fn expand_api_dto(args: DtoArgs, mut item: DeriveInput) -> proc_macro2::TokenStream {
    break_self_references(&mut item, args.no_recursion);
    let name = &item.ident;
    let (impl_generics, ty_generics, where_clause) = item.generics.split_for_impl();
    let rename_all = args
        .rename_all
        .unwrap_or_else(|| LitStr::new("camelCase", Span::call_site()));

    let in_impl = if args.custom_in {
        quote! {}
    } else {
        quote! { impl #impl_generics ::brasa::InTransform for #name #ty_generics #where_clause {} }
    };
    let out_impl = if args.custom_out {
        quote! {}
    } else {
        quote! { impl #impl_generics ::brasa::OutTransform for #name #ty_generics #where_clause {} }
    };

    quote! {
        #[derive(::serde::Serialize, ::serde::Deserialize, ::utoipa::ToSchema, ::std::fmt::Debug, ::std::clone::Clone)]
        #[serde(rename_all = #rename_all)]
        #item

        #in_impl
        #out_impl
    }
}

fn mentions(tokens: proc_macro2::TokenStream, ident: &Ident) -> bool {
    tokens.into_iter().any(|tree| match tree {
        TokenTree::Ident(found) => found == *ident || found == "Self",
        TokenTree::Group(group) => mentions(group.stream(), ident),
        _ => false,
    })
}

/// utoipa recurses into every field type while collecting schemas; a type
/// that contains itself never bottoms out.
fn break_self_references(item: &mut DeriveInput, always: bool) {
    let name = item.ident.clone();
    let no_recursion: Attribute = parse_quote!(#[schema(no_recursion)]);
    let refers_to_self = |ty: &syn::Type| mentions(ty.to_token_stream(), &name);

    let mut on_container = always;
    match &mut item.data {
        Data::Struct(data) => match &mut data.fields {
            Fields::Named(fields) if !always => {
                for field in fields.named.iter_mut().filter(|f| refers_to_self(&f.ty)) {
                    field.attrs.push(no_recursion.clone());
                }
            }
            Fields::Unnamed(fields) => on_container |= fields.unnamed.iter().any(|f| refers_to_self(&f.ty)),
            _ => {}
        },
        Data::Enum(data) => {
            on_container |= data
                .variants
                .iter()
                .any(|variant| variant.fields.iter().any(|f| refers_to_self(&f.ty)));
        }
        Data::Union(_) => {}
    }
    if on_container {
        item.attrs.push(no_recursion);
    }
}

/// Generates a registration function for a typed controller.
///
/// `#[api(GET, "/recipes/{id}", tag = "Recipes")]` on `async fn get_recipe`
/// keeps the function and adds `get_recipe_route(&mut Server)`, which
/// registers it and returns the route handle. The first doc comment line
/// becomes the operation summary, the rest its description.
///
/// Options after the path: `tag = "..."` (repeatable), `operation_id = "..."`
/// and `deprecated`.
#[proc_macro_attribute]
pub fn api(args: TokenStream, input: TokenStream) -> TokenStream {
    let item = parse_macro_input!(input as ItemFn);
    let args = parse_macro_input!(args as ApiMacroArgs);
    match expand_api(args, item) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

struct ApiMacroArgs {
    method: Ident,
    path: LitStr,
    tags: Vec<LitStr>,
    operation_id: Option<LitStr>,
    deprecated: bool,
}

impl Parse for ApiMacroArgs {
    fn parse(input: ParseStream) -> Result<Self> {
        let method: Ident = input.parse()?;
        input.parse::<Token![,]>()?;
        let path: LitStr = input.parse()?;
        let mut args = ApiMacroArgs {
            method,
            path,
            tags: Vec::new(),
            operation_id: None,
            deprecated: false,
        };

        while input.parse::<Token![,]>().is_ok() {
            if input.is_empty() {
                break;
            }
            let key: Ident = input.parse()?;
            match key.to_string().as_str() {
                "tag" => {
                    input.parse::<Token![=]>()?;
                    args.tags.push(input.parse()?);
                }
                "operation_id" => {
                    input.parse::<Token![=]>()?;
                    args.operation_id = Some(input.parse()?);
                }
                "deprecated" => args.deprecated = true,
                other => {
                    return Err(syn::Error::new(
                        key.span(),
                        format!("unknown api option `{other}`; expected tag, operation_id or deprecated"),
                    ))
                }
            }
        }
        Ok(args)
    }
}

const METHODS: [&str; 5] = ["GET", "POST", "PUT", "PATCH", "DELETE"];

fn expand_api(args: ApiMacroArgs, item: ItemFn) -> Result<proc_macro2::TokenStream> {
    let method_str = args.method.to_string().to_uppercase();
    if !METHODS.contains(&method_str.as_str()) {
        return Err(syn::Error::new(
            args.method.span(),
            format!("unsupported method `{}`; expected one of {}", args.method, METHODS.join(", ")),
        ));
    }
    if !args.path.value().starts_with('/') {
        return Err(syn::Error::new(args.path.span(), "path must start with `/`"));
    }
    let method = Ident::new(&method_str, args.method.span());
    let path = &args.path;

    let vis = &item.vis;
    let fn_name = &item.sig.ident;
    let route_fn = Ident::new(&format!("{}_route", fn_name.to_string().to_snake_case()), fn_name.span());

    // 文档注释：首行为 summary，其余为 description
    let (summary, description) = parse_doc_comments(&item.attrs);
    let mut options = quote! { ::brasa::RouteOptions::new() };
    for tag in &args.tags {
        options = quote! { #options.tag(#tag) };
    }
    if !summary.is_empty() {
        options = quote! { #options.summary(#summary) };
    }
    if !description.is_empty() {
        options = quote! { #options.description(#description) };
    }
    if let Some(id) = &args.operation_id {
        options = quote! { #options.operation_id(#id) };
    }
    if args.deprecated {
        options = quote! { #options.deprecated() };
    }

    let doc = format!("Registers [`{fn_name}`] as `{method_str} {}`.", path.value());
    Ok(quote! {
        #item

        #[doc = #doc]
        #vis fn #route_fn(server: &mut ::brasa::Server) -> ::brasa::RouteHandle<'_> {
            ::brasa::register(server, ::brasa::Method::#method, #path, #fn_name, #options)
        }
    })
}

/// Parses doc comments (`///` and `/** ... */`) into a summary and description.
fn parse_doc_comments(attrs: &[Attribute]) -> (String, String) {
    let doc_comments: Vec<String> = attrs
        .iter()
        .filter_map(|attr| {
            if attr.path().is_ident("doc") {
                if let syn::Meta::NameValue(nv) = &attr.meta {
                    if let syn::Expr::Lit(expr_lit) = &nv.value {
                        if let syn::Lit::Str(lit) = &expr_lit.lit {
                            return Some(lit.value().trim().to_string());
                        }
                    }
                }
            }
            None
        })
        .collect();

    let mut lines = doc_comments.iter().flat_map(|c| c.lines()).map(str::trim);
    let summary = lines.next().unwrap_or("").to_string();
    let description = lines.collect::<Vec<_>>().join("\n").trim().to_string();
    (summary, description)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doc_comments_split_into_summary_and_description() {
        let item: ItemFn = syn::parse_quote! {
            /// List recipes
            ///
            /// Sorted by name.
            async fn list(ctx: Context) -> Result<Vec<Recipe>, Error> { todo!() }
        };
        let (summary, description) = parse_doc_comments(&item.attrs);
        assert_eq!(summary, "List recipes");
        assert_eq!(description, "Sorted by name.");
    }

    #[test]
    fn api_args_accept_tags_and_flags() {
        let args: ApiMacroArgs = syn::parse_quote!(get, "/recipes", tag = "Recipes", deprecated);
        assert_eq!(args.method, "get");
        assert_eq!(args.path.value(), "/recipes");
        assert_eq!(args.tags.len(), 1);
        assert!(args.deprecated);
    }

    #[test]
    fn unknown_method_is_rejected() {
        let args: ApiMacroArgs = syn::parse_quote!(TRACE, "/x");
        let item: ItemFn = syn::parse_quote! { async fn x(ctx: Context) -> Result<String, Error> { todo!() } };
        assert!(expand_api(args, item).is_err());
    }

    #[test]
    fn self_referencing_fields_stop_schema_recursion() {
        let mut item: DeriveInput = syn::parse_quote! {
            pub struct Category {
                pub name: String,
                pub children: Vec<Category>,
                pub parent: Option<Box<Self>>,
            }
        };
        break_self_references(&mut item, false);
        let Data::Struct(data) = &item.data else { unreachable!() };
        let marked: Vec<String> = data
            .fields
            .iter()
            .filter(|f| !f.attrs.is_empty())
            .map(|f| f.ident.as_ref().unwrap().to_string())
            .collect();
        assert_eq!(marked, vec!["children", "parent"]);
        assert!(item.attrs.is_empty());

        let mut tree: DeriveInput = syn::parse_quote! {
            pub enum Node { Leaf(String), Branch(Vec<Node>) }
        };
        break_self_references(&mut tree, false);
        assert_eq!(tree.attrs.len(), 1);
    }

    #[test]
    fn dto_flags_skip_default_impls() {
        let args: DtoArgs = syn::parse_quote!(in_transform, rename_all = "snake_case");
        assert!(args.custom_in);
        assert!(!args.custom_out);
        assert_eq!(args.rename_all.map(|l| l.value()).as_deref(), Some("snake_case"));
    }
}
