use core::mem::size_of;
use core::net::Ipv4Addr;

use bilge::prelude::*;
use utils::bytes::{self, Cast, Unaligned};
use utils::endian::{b, u16be, u32be};

/// Size of the fixed message header.
pub const HEADER: usize = size_of::<Header>();

pub const TY_A: u16 = 1;

/// Compression pointer indirections tolerated while decoding a name.
const MAX_HOPS: usize = 16;

#[bitsize(4)]
#[derive(FromBits, Debug)]
pub enum Opcode {
	/// a standard query
	Query = 0,
	/// an inverse query
	IQuery = 1,
	/// a server status request
	Status = 2,
	#[fallback]
	Reserved,
}

#[bitsize(4)]
#[derive(FromBits, Debug, PartialEq)]
pub enum Rcode {
	Ok = 0,
	FormatErr = 1,
	ServerFailure = 2,
	NameErr = 3,
	NotImplemented = 4,
	Refused = 5,
	#[fallback]
	Reserved,
}

#[bitsize(16)]
#[derive(FromBits)]
pub struct Flags {
	rcode: Rcode,
	z: u3,
	/// Recursion available.
	ra: bool,
	/// Recursion desired.
	rd: bool,
	/// Truncated.
	tc: bool,
	/// Authoritative answer.
	aa: bool,
	opcode: Opcode,
	/// Whether this message is a response.
	qr: bool,
}

/// The fixed header present in every message.
#[derive(Cast)]
#[repr(C)]
pub struct Header {
	/// Transaction id correlating a response with its query.
	pub id: u16be,
	pub flags: b<Flags>,
	pub qdcount: u16be,
	pub ancount: u16be,
	pub nscount: u16be,
	pub arcount: u16be,
}

impl Header {
	pub fn id(&self) -> u16 {
		self.id.get()
	}

	pub fn rcode(&self) -> Rcode {
		self.flags.get().rcode()
	}
}

/// A resource record minus its name and rdata.
#[derive(Cast)]
#[repr(C)]
struct Rr {
	ty: u16be,
	class: u16be,
	ttl: u32be,
	rdlength: u16be,
}

/// Read a wire struct off the front of `buf`, advancing it.
fn take<'a, T: Cast + Unaligned>(buf: &mut &'a [u8]) -> Option<&'a T> {
	if buf.len() < size_of::<T>() {
		return None;
	}

	let (head, rest) = buf.split_at(size_of::<T>());
	*buf = rest;

	Some(bytes::cast(head))
}

/// The message header, if the datagram is long enough to carry one.
pub fn header(mut buf: &[u8]) -> Option<&Header> {
	take(&mut buf)
}

/// The decoded name of the first question, if there is one.
pub fn question(buf: &[u8]) -> Option<String> {
	let header = header(buf)?;

	if header.qdcount.get() == 0 {
		return None;
	}

	name_at(buf, HEADER).map(|(name, _)| name)
}

/// Decode the name starting at `off`, following compression pointers.
/// Returns the name and the offset just past its in-place encoding.
fn name_at(buf: &[u8], mut off: usize) -> Option<(String, usize)> {
	let mut name = String::new();
	let mut end = None;
	let mut hops = 0;

	loop {
		let len = *buf.get(off)?;

		match len >> 6 {
			// A plain label.
			0b00 => {
				if len == 0 {
					break;
				}

				let label = buf.get(off + 1..off + 1 + len as usize)?;

				if !name.is_empty() {
					name.push('.');
				}

				name.extend(label.iter().map(|&c| char::from(c)));

				off += 1 + len as usize;
			}
			// A pointer elsewhere into the message.
			0b11 => {
				let ptr = u16::from_be_bytes([len & 0x3f, *buf.get(off + 1)?]);

				hops += 1;
				if hops > MAX_HOPS {
					return None;
				}

				// The in-place encoding ends at the first pointer.
				end.get_or_insert(off + 2);
				off = ptr as usize;
			}
			_ => return None,
		}
	}

	Some((name, end.unwrap_or(off + 1)))
}

/// Step over a name encoding without decoding it.
fn skip_name(buf: &[u8], mut off: usize) -> Option<usize> {
	loop {
		let len = *buf.get(off)?;

		match len >> 6 {
			0b00 => {
				if len == 0 {
					return Some(off + 1);
				}

				off += 1 + len as usize;
			}
			// A pointer is the final element of an encoding.
			0b11 => {
				buf.get(off + 1)?;
				return Some(off + 2);
			}
			_ => return None,
		}
	}
}

/// Iterate over the addresses in the A answers of a response. Record types
/// other than A are stepped over; a malformed record ends the iteration.
pub fn a_records(buf: &[u8]) -> Answers<'_> {
	let (off, count) = answer_section(buf).unwrap_or_default();

	Answers { buf, off, count }
}

fn answer_section(buf: &[u8]) -> Option<(usize, u16)> {
	let header = header(buf)?;
	let mut off = HEADER;

	// Step over the question section.
	for _ in 0..header.qdcount.get() {
		off = skip_name(buf, off)? + 4;
	}

	Some((off, header.ancount.get()))
}

pub struct Answers<'a> {
	buf: &'a [u8],
	off: usize,
	count: u16,
}

impl Iterator for Answers<'_> {
	type Item = Ipv4Addr;

	fn next(&mut self) -> Option<Ipv4Addr> {
		while self.count > 0 {
			self.count -= 1;

			let off = skip_name(self.buf, self.off)?;
			let mut rest = self.buf.get(off..)?;

			let rr: &Rr = take(&mut rest)?;
			let rdlength = rr.rdlength.get() as usize;
			let rdata = rest.get(..rdlength)?;

			self.off = off + size_of::<Rr>() + rdlength;

			if rr.ty.get() == TY_A && rdlength == size_of::<Ipv4Addr>() {
				return Some(*bytes::cast(rdata));
			}
		}

		None
	}
}

/// Rewrite a query so its question name ends in a compression pointer instead
/// of a root label, lengthening the datagram by one byte. The pointer target
/// 0x04 lands on the zero high byte of qdcount, which reads back as a root
/// label. Certain filtering middleboxes mishandle the pointered form, which is
/// the point of sending it.
///
/// Queries whose question already contains a pointer, or whose name does not
/// terminate cleanly before the type/class trailer, are left alone.
pub fn add_compression_pointer(buf: &[u8]) -> Option<Vec<u8>> {
	let mut off = HEADER;

	let end = loop {
		if off + 4 >= buf.len() {
			return None;
		}

		let len = buf[off];

		if len & 0xc0 != 0 {
			return None;
		}

		if len == 0 {
			break off;
		}

		off += 1 + len as usize;
	};

	// Replace the terminal zero octet with the pointer, shifting the trailer.
	let mut out = Vec::with_capacity(buf.len() + 1);
	out.extend_from_slice(&buf[..end]);
	out.extend_from_slice(&[0xc0, 0x04]);
	out.extend_from_slice(&buf[end + 1..]);

	Some(out)
}
