// Naming Tests
// Virtual peer names (<name>.yacy, <hash>.yacyh) and cluster definitions

use super::common::{hash_of, named_peer, peer, TestNet};
use crate::dns::PeerNameResolver;
use crate::types::PeerType;

fn resolver(net: &TestNet) -> PeerNameResolver {
    PeerNameResolver::new(net.registry.clone())
}

// =============================================================================
// RESOLVE
// =============================================================================

pub mod resolve {
    use super::*;

    #[test]
    fn test_resolve_by_name() {
        let net = TestNet::new();
        net.registry.add_connected(&named_peer(4, "delta"));

        let resolver = resolver(&net);
        assert_eq!(resolver.resolve("delta.yacy").as_deref(), Some("10.0.0.4:8090"));
        assert_eq!(resolver.resolve("DELTA.Yacy").as_deref(), Some("10.0.0.4:8090"));
        assert_eq!(resolver.resolve("www.delta.yacy").as_deref(), Some("10.0.0.4:8090/www"));
    }

    #[test]
    fn test_resolve_by_hash() {
        let net = TestNet::new();
        net.registry.add_connected(&peer(5));
        let hash = hash_of(5);

        let resolver = resolver(&net);
        let by_base64 = format!("{}.yacyh", hash);
        let by_hex = format!("{}.yacyh", hash.to_hex());
        assert_eq!(resolver.resolve(&by_base64).as_deref(), Some("10.0.0.5:8090"));
        assert_eq!(resolver.resolve(&by_hex).as_deref(), Some("10.0.0.5:8090"));
    }

    #[test]
    fn test_hash_names_only_cover_active_peers() {
        let net = TestNet::new();
        net.registry.add_disconnected(&peer(6));

        let host = format!("{}.yacyh", hash_of(6));
        assert!(resolver(&net).resolve(&host).is_none());
    }

    #[test]
    fn test_unknown_hosts() {
        let net = TestNet::new();
        let resolver = resolver(&net);
        assert!(resolver.resolve("nobody.yacy").is_none());
        assert!(resolver.resolve("example.org").is_none());
        assert!(resolver.resolve("yacy").is_none());
        assert!(resolver.resolve("notahash.yacyh").is_none());
    }

    #[test]
    fn test_offline_own_seed_resolves_locally() {
        let net = TestNet::new();
        let resolver = resolver(&net);
        assert_eq!(resolver.resolve("self.yacy").as_deref(), Some("127.0.0.1:8090"));
        assert_eq!(resolver.resolve("localpeer.yacy").as_deref(), Some("127.0.0.1:8090"));
        assert_eq!(resolver.resolve("blog.self.yacy").as_deref(), Some("127.0.0.1:8090/blog"));
    }

    #[test]
    fn test_online_own_seed_resolves_publicly() {
        let net = TestNet::new();
        let mut own = net.registry.own_seed();
        own.set_ip("10.8.8.8");
        own.set_peer_type(PeerType::Senior);
        net.registry.update(&own.hash(), &own);

        let resolver = resolver(&net);
        assert_eq!(resolver.resolve("self.yacy").as_deref(), Some("10.8.8.8:8090"));
        let by_hash = format!("{}.yacyh", own.hash());
        assert_eq!(resolver.resolve(&by_hash).as_deref(), Some("10.8.8.8:8090"));
    }
}

// =============================================================================
// CLUSTERS
// =============================================================================

pub mod cluster {
    use super::*;

    #[test]
    fn test_cluster_with_override_and_unknown_member() {
        let net = TestNet::new();
        net.registry.add_connected(&named_peer(1, "abc"));

        let members = resolver(&net).cluster_hashes("abc.yacy=127.0.0.1:8080,badname.yacy");
        assert_eq!(members.len(), 1);
        assert_eq!(members.get(&hash_of(1)), Some(&Some("127.0.0.1:8080".to_string())));
    }

    #[test]
    fn test_cluster_by_hash_in_hash_order() {
        let net = TestNet::new();
        net.registry.add_connected(&peer(9));
        net.registry.add_connected(&named_peer(2, "bee"));

        let definition = format!("{}.yacyh, bee.yacy", hash_of(9));
        let members = resolver(&net).cluster_hashes(&definition);

        let hashes: Vec<_> = members.keys().copied().collect();
        assert_eq!(hashes, vec![hash_of(2), hash_of(9)]);
        assert!(members.values().all(Option::is_none));
    }

    #[test]
    fn test_passive_member_by_hex_hash() {
        let net = TestNet::new();
        net.registry.add_disconnected(&peer(6));
        net.registry.add_potential(&peer(7));

        let definition = format!("{}.yacyh=10.9.9.9:80, {}.yacyh", hash_of(6).to_hex(), hash_of(7));
        let members = resolver(&net).cluster_hashes(&definition);
        assert_eq!(members.len(), 2);
        assert_eq!(members.get(&hash_of(6)), Some(&Some("10.9.9.9:80".to_string())));
        assert_eq!(members.get(&hash_of(7)), Some(&None));
    }

    #[test]
    fn test_malformed_members_are_skipped() {
        let net = TestNet::new();
        net.registry.add_connected(&named_peer(1, "abc"));
        net.registry.add_connected(&named_peer(2, "def"));

        let members = resolver(&net).cluster_hashes("abc.example, abc.yacy=not-an-ip, def.yacy=10.1.1.1, ,");
        assert_eq!(members.len(), 1);
        assert_eq!(members.get(&hash_of(2)), Some(&Some("10.1.1.1".to_string())));
    }

    #[test]
    fn test_empty_definition() {
        let net = TestNet::new();
        assert!(resolver(&net).cluster_hashes("").is_empty());
    }
}
