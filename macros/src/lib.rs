use proc_macro2::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Data, DataEnum, DataUnion, DeriveInput, Error, Type};

/// Derives `utils::bytes::Cast` and `utils::bytes::Unaligned` for a struct.
///
/// The struct must be `repr(C)` or `repr(C, packed)` and non-generic. For a
/// non-packed struct, a padding check is emitted as a const equality bound so
/// that a struct with internal padding fails to compile rather than exposing
/// uninitialized bytes.
#[proc_macro_derive(Cast)]
pub fn cast(item: proc_macro::TokenStream) -> proc_macro::TokenStream {
	let DeriveInput { attrs, ident: name, generics, data, .. } = parse_macro_input!(item as DeriveInput);

	if !generics.params.is_empty() {
		return Error::new_spanned(generics, "Generic structs are not supported.").to_compile_error().into();
	}

	// Whether "C" has been seen
	let mut base = false;
	let mut packed = false;

	for attr in &attrs {
		if attr.path().is_ident("repr") {
			let res = attr.parse_nested_meta(|meta| {
				if meta.path.is_ident("C") {
					base = true;
				} else if meta.path.is_ident("packed") {
					packed = true;
				} else {
					return Err(meta.error("Unexpected repr"));
				}

				Ok(())
			});

			if let Err(err) = res {
				return err.to_compile_error().into();
			}
		}
	}

	if !base {
		return Error::new_spanned(&name, "Struct needs explicit repr(C)").to_compile_error().into();
	}

	let fields: Vec<Type> = match data {
		Data::Struct(obj) => obj.fields.into_iter().map(|field| field.ty).collect(),
		Data::Enum(DataEnum { enum_token, .. }) => return Error::new_spanned(enum_token, "Enums are not supported.").to_compile_error().into(),
		Data::Union(DataUnion { union_token, .. }) => return Error::new_spanned(union_token, "Unions are not supported.").to_compile_error().into(),
	};

	// A packed struct has no padding by construction; repr(C) needs the field
	// sizes to add up to the struct size.
	let no_padding = if packed || fields.is_empty() {
		TokenStream::new()
	} else {
		quote! {
			::utils::bytes::cast::V<{ 0 #( + ::core::mem::size_of::<#fields>() )* }>:
				::utils::bytes::cast::Eq<{ ::core::mem::size_of::<#name>() }>,
		}
	};

	// A packed struct has an alignment of 1 regardless of its fields.
	let unaligned = if packed {
		quote! {
			unsafe impl ::utils::bytes::Unaligned for #name {}
		}
	} else {
		quote! {
			unsafe impl ::utils::bytes::Unaligned for #name where
				#( #fields: ::utils::bytes::Unaligned ),*
			{}
		}
	};

	quote! {
		unsafe impl ::utils::bytes::Cast for #name where
			#no_padding
			#( #fields: ::utils::bytes::Cast ),*
		{}

		#unaligned
	}
	.into()
}
