extern crate proc_macro;

use proc_macro::TokenStream;
use proc_macro2::{Ident, Span};
use quote::quote;

#[derive(Default)]
struct Options {
    crate_name: Option<Ident>,
    parallelism: Option<usize>,
}

impl Options {
    fn crate_name(&mut self, lit: syn::Lit) -> Result<(), syn::Error> {
        let span = lit.span();
        if self.crate_name.is_some() {
            return Err(syn::Error::new(span, "crate name already set"));
        }
        let syn::Lit::Str(s) = lit else {
            return Err(syn::Error::new(span, "crate name should be string literal"));
        };
        match s.parse::<syn::Path>().ok().and_then(|path| path.get_ident().cloned()) {
            Some(ident) => {
                self.crate_name = Some(ident);
                Ok(())
            },
            None => Err(syn::Error::new(span, format!("invalid crate name: {}", s.value()))),
        }
    }

    fn parallelism(&mut self, lit: syn::Lit) -> Result<(), syn::Error> {
        let span = lit.span();
        if self.parallelism.is_some() {
            return Err(syn::Error::new(span, "parallelism already set"));
        }
        if let syn::Lit::Int(lit) = &lit {
            let parallelism = lit.base10_parse::<usize>()?;
            if parallelism > 0 {
                self.parallelism = Some(parallelism);
                return Ok(());
            }
        }
        Err(syn::Error::new(span, "parallelism should be positive integer"))
    }

    fn parse(args: syn::AttributeArgs) -> Result<Options, syn::Error> {
        let mut options = Options::default();
        for arg in args.into_iter() {
            let syn::NestedMeta::Meta(syn::Meta::NameValue(name_value)) = arg else {
                return Err(syn::Error::new_spanned(arg, "unknown attribute"));
            };
            let name = name_value
                .path
                .get_ident()
                .ok_or_else(|| syn::Error::new_spanned(&name_value, "invalid attribute name"))?
                .to_string();
            match name.as_str() {
                "crate" => options.crate_name(name_value.lit)?,
                "parallelism" => options.parallelism(name_value.lit)?,
                _ => return Err(syn::Error::new_spanned(&name_value, "unknown attribute name")),
            }
        }
        Ok(options)
    }
}

fn generate(is_test: bool, attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = syn::parse_macro_input!(attr as syn::AttributeArgs);
    let input = syn::parse_macro_input!(item as syn::ItemFn);
    let options = match Options::parse(args) {
        Ok(options) => options,
        Err(err) => return TokenStream::from(err.into_compile_error()),
    };

    let macro_name = if is_test { "#[launchpad::test]" } else { "#[launchpad::main]" };
    if input.sig.asyncness.is_some() {
        let err = syn::Error::new_spanned(&input, format!("{} runs synchronous functions only", macro_name));
        return TokenStream::from(err.into_compile_error());
    }
    if !is_test && input.sig.ident != "main" {
        let err = syn::Error::new_spanned(&input.sig.ident, "#[launchpad::main] is reserved for the main function");
        return TokenStream::from(err.into_compile_error());
    }

    let ret = &input.sig.output;
    let inputs = &input.sig.inputs;
    let name = &input.sig.ident;
    let body = &input.block;
    let attrs = &input.attrs;
    let vis = &input.vis;

    let header = if is_test {
        quote! {
            #[::core::prelude::v1::test]
        }
    } else {
        quote! {}
    };

    let crate_name = options.crate_name.unwrap_or_else(|| Ident::new("launchpad", Span::call_site()));
    let parallelism = options.parallelism.unwrap_or(0);
    let result = quote! {
        #header
        #(#attrs)*
        #vis fn #name() #ret {
            fn entry(#inputs) #ret {
                #body
            }

            let mut builder = #crate_name::runtime::Builder::default();
            if #parallelism != 0 {
                builder.parallelism(#parallelism);
            }
            let runtime = builder.build();
            match runtime.block_on(entry) {
                Ok(value) => value,
                Err(err) => ::std::panic::resume_unwind(err.into_panic()),
            }
        }
    };

    result.into()
}

/// Runs the marked main function as the first task of a fresh runtime.
///
/// The runtime is shut down once `main` returns. Tasks spawned but not joined by then are
/// dropped with it.
///
/// ## Options
/// * `parallelism`: positive integer to specify scheduling threads of the runtime
///
/// ## Examples
/// ```rust,ignore
/// #[launchpad::main]
/// fn main() {
///     launchpad::task::yield_now();
/// }
/// ```
///
/// ```rust,ignore
/// #[launchpad::main(parallelism = 1)]
/// fn main() {
///     launchpad::time::delay(std::time::Duration::from_millis(5));
/// }
/// ```
#[cfg(not(test))]
#[proc_macro_attribute]
pub fn main(attr: TokenStream, item: TokenStream) -> TokenStream {
    generate(false, attr, item)
}

/// Runs the marked test function as a task of a fresh runtime.
///
/// See [macro@main] for configurable options.
#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
    generate(true, attr, item)
}
