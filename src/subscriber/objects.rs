use std::{collections::BTreeSet, fmt::Debug, hash::Hash};

use futures::{future, Stream, TryStreamExt};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube_client::Api;
use kube_core::Resource;
use kube_runtime::{reflector, watcher};
use serde::de::DeserializeOwned;

use super::Event;

/// Emits [`Event::ResourcesDrifted`] whenever one of the named CRDs is
/// deleted, or is absent from a (re)list.
pub fn crd_deletions(
    api: Api<CustomResourceDefinition>,
    names: BTreeSet<String>,
) -> impl Stream<Item = Result<Event, watcher::Error>> {
    watcher(api, watcher::Config::default())
        .try_filter_map(move |event| future::ready(Ok(drift(&names, &event))))
}

/// Keeps `writer` in sync with the objects selected by `watcher_config`.
///
/// Yields no events of its own; it only has to be polled alongside the
/// other subscribers so that readers of the store see fresh objects.
pub fn mirror<K>(
    api: Api<K>,
    watcher_config: watcher::Config,
    writer: reflector::store::Writer<K>,
) -> impl Stream<Item = Result<Event, watcher::Error>>
where
    K: Resource + 'static + Debug + Clone + DeserializeOwned + Send,
    K::DynamicType: Clone + Eq + Hash,
{
    reflector(writer, watcher(api, watcher_config))
        .try_filter_map(|_| future::ready(Ok(None::<Event>)))
}

fn drift(
    names: &BTreeSet<String>,
    event: &watcher::Event<CustomResourceDefinition>,
) -> Option<Event> {
    let managed = |crd: &CustomResourceDefinition| {
        crd.metadata
            .name
            .as_ref()
            .is_some_and(|name| names.contains(name))
    };

    match event {
        watcher::Event::Deleted(crd) if managed(crd) => {
            log::info!(
                "managed CRD {} was deleted",
                crd.metadata.name.as_deref().unwrap_or_default()
            );
            Some(Event::ResourcesDrifted)
        }
        watcher::Event::Restarted(crds) => {
            let present: BTreeSet<&str> = crds
                .iter()
                .filter_map(|crd| crd.metadata.name.as_deref())
                .collect();
            let missing: Vec<&str> = names
                .iter()
                .map(String::as_str)
                .filter(|name| !present.contains(name))
                .collect();
            if missing.is_empty() {
                None
            } else {
                log::info!("managed CRDs missing from cluster: {}", missing.join(", "));
                Some(Event::ResourcesDrifted)
            }
        }
        _ => None,
    }
}
