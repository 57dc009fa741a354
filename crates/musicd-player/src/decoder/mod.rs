//! Decoder plugins and the thread that runs them.

mod api;
pub mod symphonia;
mod thread;

use std::sync::Arc;

use anyhow::Result;

use crate::song::Song;

pub use api::DecoderApi;
pub use thread::spawn_decoder_thread;

/// A codec wrapper that turns one song into PCM through a [`DecoderApi`].
///
/// `decode` reports the song's format with [`DecoderApi::initialized`], then
/// submits PCM with [`DecoderApi::data`] until the stream ends or a STOP is
/// pending, serving SEEK commands in between. Errors returned before
/// `initialized` mark the song as undecodable.
pub trait DecoderPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    /// Lower-case file suffixes handled by this plugin.
    fn suffixes(&self) -> &'static [&'static str];

    fn mime_types(&self) -> &'static [&'static str] {
        &[]
    }

    fn supports_suffix(&self, suffix: &str) -> bool {
        self.suffixes()
            .iter()
            .any(|s| s.eq_ignore_ascii_case(suffix))
    }

    fn decode(&self, api: &mut DecoderApi<'_>, song: &Song) -> Result<()>;
}

impl<P: DecoderPlugin + ?Sized> DecoderPlugin for &'static P {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn suffixes(&self) -> &'static [&'static str] {
        (**self).suffixes()
    }

    fn mime_types(&self) -> &'static [&'static str] {
        (**self).mime_types()
    }

    fn decode(&self, api: &mut DecoderApi<'_>, song: &Song) -> Result<()> {
        (**self).decode(api, song)
    }
}

/// Built-in decoder plugins, in lookup order.
pub static DECODER_PLUGINS: &[&'static dyn DecoderPlugin] = &[&symphonia::SymphoniaDecoder];

/// Ordered set of decoder plugins; the first one claiming a suffix wins.
#[derive(Clone, Default)]
pub struct DecoderRegistry {
    plugins: Vec<Arc<dyn DecoderPlugin>>,
}

impl std::fmt::Debug for DecoderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.plugins.iter().map(|p| p.name()))
            .finish()
    }
}

impl DecoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every entry of [`DECODER_PLUGINS`].
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for plugin in DECODER_PLUGINS {
            registry.register(Arc::new(*plugin));
        }
        registry
    }

    pub fn register(&mut self, plugin: Arc<dyn DecoderPlugin>) {
        tracing::debug!(plugin = plugin.name(), "decoder plugin registered");
        self.plugins.push(plugin);
    }

    pub fn plugins(&self) -> impl Iterator<Item = &Arc<dyn DecoderPlugin>> {
        self.plugins.iter()
    }

    pub fn find_by_name(&self, name: &str) -> Option<Arc<dyn DecoderPlugin>> {
        self.plugins.iter().find(|p| p.name() == name).cloned()
    }

    pub fn find_by_suffix(&self, suffix: &str) -> Option<Arc<dyn DecoderPlugin>> {
        self.plugins
            .iter()
            .find(|p| p.supports_suffix(suffix))
            .cloned()
    }

    /// Plugin for `song`, chosen by its URI suffix.
    pub fn find_for(&self, song: &Song) -> Option<Arc<dyn DecoderPlugin>> {
        self.find_by_suffix(&song.suffix()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fake(&'static str, &'static [&'static str]);

    impl DecoderPlugin for Fake {
        fn name(&self) -> &'static str {
            self.0
        }

        fn suffixes(&self) -> &'static [&'static str] {
            self.1
        }

        fn decode(&self, _api: &mut DecoderApi<'_>, _song: &Song) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn builtin_registry_handles_flac() {
        let registry = DecoderRegistry::builtin();
        let plugin = registry.find_for(&Song::new("music/a.FLAC")).unwrap();
        assert_eq!(plugin.name(), "symphonia");
        assert!(registry.find_for(&Song::new("music/a.xyz")).is_none());
        assert!(registry.find_for(&Song::new("music/noext")).is_none());
    }

    #[test]
    fn first_registered_plugin_wins() {
        let mut registry = DecoderRegistry::new();
        registry.register(Arc::new(Fake("first", &["ogg"])));
        registry.register(Arc::new(Fake("second", &["ogg", "opus"])));
        assert_eq!(registry.find_by_suffix("ogg").unwrap().name(), "first");
        assert_eq!(registry.find_by_suffix("opus").unwrap().name(), "second");
        assert!(registry.find_by_name("second").is_some());
    }
}
