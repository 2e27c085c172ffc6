#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::PropagationPolicy;
use kube::core::ErrorResponse;
use kube::{Resource, ResourceExt};
use tether_kubehub::{HostApi, NamespacedResource, TenantCache};

pub fn api_err(code: u16, reason: &str) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".into(),
        message: format!("injected {reason}"),
        reason: reason.into(),
        code,
    })
}

struct HostState<K> {
    objects: BTreeMap<(String, String), K>,
    namespaces: BTreeSet<String>,
    next_rv: u64,
    fail_next: VecDeque<kube::Error>,
    create_calls: usize,
    replace_calls: usize,
    delete_calls: usize,
}

/// In-memory host cluster with the same race semantics as a real API server.
pub struct FakeHost<K> {
    state: Mutex<HostState<K>>,
}

impl<K: NamespacedResource> FakeHost<K> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(HostState {
                objects: BTreeMap::new(),
                namespaces: BTreeSet::new(),
                next_rv: 1,
                fail_next: VecDeque::new(),
                create_calls: 0,
                replace_calls: 0,
                delete_calls: 0,
            }),
        })
    }

    /// Fail the next mutating call (create/replace/delete) with `err`.
    pub fn fail_next(&self, err: kube::Error) { self.state.lock().unwrap().fail_next.push_back(err); }

    pub fn object(&self, namespace: &str, name: &str) -> Option<K> {
        self.state.lock().unwrap().objects.get(&(namespace.to_string(), name.to_string())).cloned()
    }

    pub fn len(&self) -> usize { self.state.lock().unwrap().objects.len() }

    pub fn has_namespace(&self, ns: &str) -> bool { self.state.lock().unwrap().namespaces.contains(ns) }

    pub fn create_calls(&self) -> usize { self.state.lock().unwrap().create_calls }
    pub fn replace_calls(&self) -> usize { self.state.lock().unwrap().replace_calls }
    pub fn delete_calls(&self) -> usize { self.state.lock().unwrap().delete_calls }

    /// Seed an object directly, bypassing the API.
    pub fn seed(&self, namespace: &str, mut obj: K) {
        let mut st = self.state.lock().unwrap();
        let rv = st.next_rv;
        st.next_rv += 1;
        obj.meta_mut().resource_version = Some(rv.to_string());
        st.namespaces.insert(namespace.to_string());
        st.objects.insert((namespace.to_string(), obj.name_any()), obj);
    }
}

#[async_trait::async_trait]
impl<K: NamespacedResource> HostApi<K> for FakeHost<K> {
    async fn create(&self, namespace: &str, obj: &K) -> Result<K, kube::Error> {
        let mut st = self.state.lock().unwrap();
        st.create_calls += 1;
        if let Some(e) = st.fail_next.pop_front() {
            return Err(e);
        }
        if !st.namespaces.contains(namespace) {
            return Err(api_err(404, "NotFound"));
        }
        let key = (namespace.to_string(), obj.name_any());
        if st.objects.contains_key(&key) {
            return Err(api_err(409, "AlreadyExists"));
        }
        let mut stored = obj.clone();
        stored.meta_mut().resource_version = Some(st.next_rv.to_string());
        st.next_rv += 1;
        st.objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, kube::Error> {
        Ok(self.object(namespace, name))
    }

    async fn replace(&self, namespace: &str, name: &str, obj: &K) -> Result<K, kube::Error> {
        let mut st = self.state.lock().unwrap();
        st.replace_calls += 1;
        if let Some(e) = st.fail_next.pop_front() {
            return Err(e);
        }
        let key = (namespace.to_string(), name.to_string());
        let Some(live) = st.objects.get(&key) else { return Err(api_err(404, "NotFound")) };
        if live.meta().resource_version != obj.meta().resource_version {
            return Err(api_err(409, "Conflict"));
        }
        let mut stored = obj.clone();
        stored.meta_mut().resource_version = Some(st.next_rv.to_string());
        st.next_rv += 1;
        st.objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn delete(&self, namespace: &str, name: &str, _propagation: PropagationPolicy) -> Result<(), kube::Error> {
        let mut st = self.state.lock().unwrap();
        st.delete_calls += 1;
        if let Some(e) = st.fail_next.pop_front() {
            return Err(e);
        }
        match st.objects.remove(&(namespace.to_string(), name.to_string())) {
            Some(_) => Ok(()),
            None => Err(api_err(404, "NotFound")),
        }
    }

    async fn list_labeled(&self, selector: &str) -> Result<Vec<K>, kube::Error> {
        let (key, value) = selector.split_once('=').unwrap_or((selector, ""));
        let st = self.state.lock().unwrap();
        Ok(st.objects.values().filter(|o| o.labels().get(key).map(String::as_str) == Some(value)).cloned().collect())
    }

    async fn ensure_namespace(&self, namespace: &str, _labels: BTreeMap<String, String>) -> Result<(), kube::Error> {
        self.state.lock().unwrap().namespaces.insert(namespace.to_string());
        Ok(())
    }
}

/// Tenant informer cache stand-in.
pub struct MapCache<K> {
    objects: Mutex<HashMap<(String, String), Arc<K>>>,
}

impl<K: NamespacedResource> MapCache<K> {
    pub fn new() -> Arc<Self> { Arc::new(Self { objects: Mutex::new(HashMap::new()) }) }

    pub fn put(&self, obj: K) {
        let key = (obj.namespace().unwrap_or_default(), obj.name_any());
        self.objects.lock().unwrap().insert(key, Arc::new(obj));
    }

    pub fn remove(&self, namespace: &str, name: &str) {
        self.objects.lock().unwrap().remove(&(namespace.to_string(), name.to_string()));
    }
}

impl<K: NamespacedResource> TenantCache<K> for MapCache<K> {
    fn lookup(&self, namespace: &str, name: &str) -> Option<Arc<K>> {
        self.objects.lock().unwrap().get(&(namespace.to_string(), name.to_string())).cloned()
    }
}

pub fn svc(namespace: &str, name: &str, rv: &str) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some(namespace.into()),
            uid: Some(format!("uid-{name}")),
            resource_version: Some(rv.into()),
            ..ObjectMeta::default()
        },
        spec: Some(ServiceSpec {
            cluster_ip: Some("10.96.0.10".into()),
            selector: Some(BTreeMap::from([("app".to_string(), name.to_string())])),
            ports: Some(vec![ServicePort { port: 80, ..ServicePort::default() }]),
            ..ServiceSpec::default()
        }),
        ..Service::default()
    }
}

pub fn label<'a, K: Resource>(obj: &'a K, key: &str) -> Option<&'a str> {
    obj.meta().labels.as_ref()?.get(key).map(String::as_str)
}
