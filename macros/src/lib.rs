use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, spanned::Spanned, Ident, ItemFn, LitStr};

/// Test attribute used across the recombine test suite.
///
/// Sync functions expand to a plain `#[test]`, async functions to
/// `#[tokio::test]`. `#[recombine_macro::test(local)]` selects the
/// current-thread runtime and `#[recombine_macro::test(shared)]` the
/// multi-thread one. Every test installs a `tracing` subscriber that writes
/// through the test harness and honors `RUST_LOG`.
#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
  let mut input = parse_macro_input!(item as ItemFn);

  let is_async = input.sig.asyncness.is_some();

  let raw_args = proc_macro2::TokenStream::from(attr);
  let tokio_args = if raw_args.is_empty() {
    proc_macro2::TokenStream::new()
  } else {
    if !is_async {
      return TokenStream::from(
        syn::Error::new(
          raw_args.span(),
          "recombine_macro::test flavor args are only supported for async tests. Use \
           #[recombine_macro::test] for sync tests, or make the function async.",
        )
        .to_compile_error(),
      );
    }

    let flavor = if let Ok(ident) = syn::parse2::<Ident>(raw_args.clone()) {
      (ident.to_string(), ident.span())
    } else if let Ok(lit) = syn::parse2::<LitStr>(raw_args.clone()) {
      (lit.value(), lit.span())
    } else {
      return unsupported_args(raw_args.span());
    };

    match flavor.0.as_str() {
      "local" => quote!(flavor = "current_thread"),
      "shared" => quote!(flavor = "multi_thread"),
      _ => return unsupported_args(flavor.1),
    }
  };

  let body = &input.block;
  let with_tracing: syn::Block = syn::parse_quote!({
    let _ = ::tracing_subscriber::fmt()
      .with_test_writer()
      .with_env_filter(::tracing_subscriber::EnvFilter::from_default_env())
      .try_init();
    #body
  });
  *input.block = with_tracing;

  let native_attr = if is_async { quote!(tokio::test(#tokio_args)) } else { quote!(test) };

  let expanded = quote! {
      #[#native_attr]
      #input
  };

  TokenStream::from(expanded)
}

fn unsupported_args(span: proc_macro2::Span) -> TokenStream {
  TokenStream::from(
    syn::Error::new(
      span,
      "recombine_macro::test only accepts: #[recombine_macro::test], \
       #[recombine_macro::test(local)], #[recombine_macro::test(shared)], or string equivalents",
    )
    .to_compile_error(),
  )
}
