/// Defines a lazy static parsed from an environment variable, falling back
/// to `$default` when the variable is unset or does not parse. The compiler
/// has no configuration file; the handful of limits in [`crate::cnf`] are
/// all sourced this way.
macro_rules! lazy_env {
	($key:expr, $t:ty, $default:expr) => {
		std::sync::LazyLock::new(|| {
			std::env::var($key).ok().and_then(|s| s.parse::<$t>().ok()).unwrap_or($default)
		})
	};
}

/// Builds an ordered map from a list of `key => value` entries.
///
/// Selector documents, grouped fields and projection shapes are all ordered
/// maps, so this shows up wherever one is written out literally.
#[macro_export]
macro_rules! map {
	($($k:expr => $v:expr),* $(,)?) => {{
		let mut m = ::std::collections::BTreeMap::new();
		$(m.insert($k, $v);)*
		m
	}};
}

/// Aborts the compile with an unreachable-state error carrying the caller
/// location. Reaching one of these means the compiler itself is wrong, so
/// the error must surface to the caller and never be retried.
macro_rules! bug {
	($($arg:tt)+) => {
		return Err(::anyhow::Error::from($crate::err::Error::unreachable(format_args!($($arg)+))))
	};
}
