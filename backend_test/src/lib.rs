use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{parse_macro_input, spanned::Spanned, FnArg, ItemFn, Pat, Signature, Type};

/// Transform an asynchronous test into a synchronous one, inject dependencies,
/// and check the store's cross-entity invariants once the test has passed.
///
/// Injectable dependencies are [`rocket::local::asynchronous::Client`] and
/// `crate::testing::TestEnv`. The client is built over the same store and
/// ledger as the injected environment.
#[proc_macro_attribute]
pub fn backend_test(args: TokenStream, input: TokenStream) -> TokenStream {
    let mut item_fn = parse_macro_input!(input as ItemFn);

    if !args.is_empty() {
        return syn::Error::new(
            TokenStream2::from(args).span(),
            "`backend_test` takes no arguments",
        )
        .into_compile_error()
        .into();
    }

    // Extract type information and reject invalid function signatures.
    let test_args = match check_sig(item_fn.sig.clone()) {
        Ok(args) => args,
        Err(err) => {
            return err.into_compile_error().into();
        }
    };

    // Rename the future so the test can have its original name.
    let name = item_fn.sig.ident.clone();
    let new_name = format_ident!("{}_fut", name);
    item_fn.sig.ident = new_name.clone();

    // Rewrite the test function.
    quote! {
        #[test]
        fn #name() {
            /// Test setup.
            async fn setup() -> (rocket::local::asynchronous::Client, crate::testing::TestEnv) {
                let env = crate::testing::TestEnv::new();
                let rocket_client = rocket::local::asynchronous::Client::tracked(env.rocket())
                    .await
                    .unwrap();

                (rocket_client, env)
            }

            /// The test itself.
            #item_fn

            /// Test cleanup.
            async fn cleanup(env: crate::testing::TestEnv) {
                env.check_invariants().await;
            }

            // Create an async runtime. We need a separate one for inside and
            // outside the `catch_unwind`.
            let outer_runtime = rocket::tokio::runtime::Builder::new_multi_thread()
                .thread_name("test-setup-cleanup")
                .worker_threads(1)
                .enable_all()
                .build()
                .unwrap();
            let inner_runtime = rocket::tokio::runtime::Builder::new_multi_thread()
                .thread_name("rocket-worker-test-thread")
                .worker_threads(2)
                .enable_all()
                .build()
                .unwrap();

            // Run the setup.
            let (rocket_client, env) = outer_runtime.block_on(setup());

            // Run the test, catching any panics.
            // Use mutexes to safely transfer `!UnwindSafe` data.
            let client_mutex = std::sync::Mutex::new(rocket_client);
            let env_mutex = std::sync::Mutex::new(env.clone());
            let runtime_mutex = std::sync::Mutex::new(inner_runtime);
            let result = std::panic::catch_unwind(|| {
                let rocket_client = client_mutex.into_inner().unwrap();
                let env = env_mutex.into_inner().unwrap();
                let runtime = runtime_mutex.into_inner().unwrap();

                runtime.block_on(#new_name(#(#test_args),*));
            });

            // If the test panicked, re-raise the panic; the invariants are
            // only meaningful after a clean run.
            if let Err(cause) = result {
                std::panic::panic_any(cause);
            }

            // Run the cleanup.
            outer_runtime.block_on(cleanup(env));
        }
    }
    .into()
}

/// Ensure the wrapped test is async, extract parameters to inject, and reject unknown parameters.
fn check_sig(sig: Signature) -> Result<Vec<TokenStream2>, syn::Error> {
    if sig.asyncness.is_none() {
        return Err(syn::Error::new(sig.span(), "Test must be marked `async`"));
    }

    let mut has_client = false;
    let mut has_env = false;
    let mut args = vec![];

    for input in &sig.inputs {
        if let FnArg::Typed(pat_type) = input {
            if let Pat::Ident(_) = &*pat_type.pat {
                if let Type::Path(type_path) = &*pat_type.ty {
                    if let Some(type_ident) = type_path.path.get_ident() {
                        if type_ident == "Client" {
                            if has_client {
                                return Err(syn::Error::new(input.span(), "Test cannot accept more than one `rocket::local::asynchronous::Client`"));
                            }
                            has_client = true;
                            args.push(quote! { rocket_client });
                            continue;
                        } else if type_ident == "TestEnv" {
                            if has_env {
                                return Err(syn::Error::new(
                                    input.span(),
                                    "Test cannot accept more than one `TestEnv`",
                                ));
                            }
                            has_env = true;
                            args.push(quote! { env });
                            continue;
                        }
                    }
                }
            }
        }

        return Err(syn::Error::new(
            input.span(),
            "Expected one of `client_ident: Client` or `env_ident: TestEnv`",
        ));
    }

    Ok(args)
}
