//! A derive macro for the `Event` trait in the `chronicle` crate.
use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, parse_macro_input};

/// Derives the `Event` trait for an enum.
///
/// Each variant becomes one event type whose discriminator is the variant's
/// name. The generated `event_types` lists every declared discriminator in
/// declaration order, which the wire codec uses to reject unknown records.
#[proc_macro_derive(Event)]
pub fn event_derive(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;

    let variants = match &input.data {
        Data::Enum(data) => &data.variants,
        _ => {
            return syn::Error::new_spanned(name, "Event derive macro can only be used on enums")
                .to_compile_error()
                .into();
        }
    };

    let event_type_arms = variants.iter().map(|variant| {
        let variant_name = &variant.ident;
        let fields = match &variant.fields {
            Fields::Named(_) => quote! { { .. } },
            Fields::Unnamed(_) => quote! { (..) },
            Fields::Unit => quote! {},
        };
        quote! {
            #name::#variant_name #fields => stringify!(#variant_name)
        }
    });

    let type_names = variants.iter().map(|variant| {
        let variant_name = &variant.ident;
        quote! { stringify!(#variant_name) }
    });

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let expanded = quote! {
        impl #impl_generics chronicle::Event for #name #ty_generics #where_clause {
            fn event_type(&self) -> &'static str {
                match self {
                    #(#event_type_arms),*
                }
            }

            fn event_types() -> &'static [&'static str] {
                &[#(#type_names),*]
            }
        }
    };

    TokenStream::from(expanded)
}
