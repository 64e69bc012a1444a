use std::cell::Cell;
use std::fmt::{self, Display, Formatter};

/// Adapter joining the display of the items of an iterator with a separator.
pub(crate) struct Fmt<I> {
	inner: Cell<Option<I>>,
	separator: &'static str,
}

impl<I> Fmt<I>
where
	I: IntoIterator,
	I::Item: Display,
{
	fn new(inner: I, separator: &'static str) -> Self {
		Self {
			inner: Cell::new(Some(inner)),
			separator,
		}
	}

	/// Formats the items separated by a comma and a space.
	pub(crate) fn comma_separated(inner: I) -> Self {
		Self::new(inner, ", ")
	}
}

impl<I> Display for Fmt<I>
where
	I: IntoIterator,
	I::Item: Display,
{
	/// Renders the items at most once; a second render produces nothing.
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		let inner = self.inner.take().ok_or(fmt::Error)?;
		for (i, item) in inner.into_iter().enumerate() {
			if i > 0 {
				f.write_str(self.separator)?;
			}
			item.fmt(f)?;
		}
		Ok(())
	}
}

/// Escapes a string for rendering between double quotes.
pub(crate) struct QuoteStr<'a>(pub(crate) &'a str);

impl Display for QuoteStr<'_> {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		f.write_str("\"")?;
		for c in self.0.chars() {
			match c {
				'"' => f.write_str("\\\"")?,
				'\\' => f.write_str("\\\\")?,
				'\n' => f.write_str("\\n")?,
				'\r' => f.write_str("\\r")?,
				'\t' => f.write_str("\\t")?,
				c => fmt::Write::write_char(f, c)?,
			}
		}
		f.write_str("\"")
	}
}
