/// Byte-identical to the documented CACHEDIR.TAG standard
/// (<https://bford.info/cachedir/>), written once at a store root so
/// backup tools know to skip it.
pub const CACHEDIR_TAG_CONTENTS: &str = "Signature: 8a477f597d28d172789f06886806bc55\n\
Comment: This directory is a compiler output cache and was created by ccache-rs.\n\
For information about cache directory tags see https://bford.info/cachedir/\n";
