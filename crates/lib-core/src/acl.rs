use crate::addr::NetAddr;

/// One accept or reject rule of an [`AddrAcl`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AclRule {
    pub prefix: NetAddr,
    pub accept: bool,
}

/// An ordered accept/reject filter over addresses.
///
/// Rules are evaluated first-match; an address matching no rule gets the
/// default verdict. Used for the per-interface HELLO source filter and the
/// OLSRv2 routable-address filter.
#[derive(Debug, Clone)]
pub struct AddrAcl {
    rules: Vec<AclRule>,
    default_accept: bool,
}

impl Default for AddrAcl {
    fn default() -> Self {
        AddrAcl::accept_all()
    }
}

impl AddrAcl {
    pub fn accept_all() -> AddrAcl {
        AddrAcl {
            rules: Vec::new(),
            default_accept: true,
        }
    }

    pub fn new(default_accept: bool) -> AddrAcl {
        AddrAcl {
            rules: Vec::new(),
            default_accept,
        }
    }

    pub fn accept(mut self, prefix: NetAddr) -> AddrAcl {
        self.rules.push(AclRule {
            prefix,
            accept: true,
        });
        self
    }

    pub fn reject(mut self, prefix: NetAddr) -> AddrAcl {
        self.rules.push(AclRule {
            prefix,
            accept: false,
        });
        self
    }

    pub fn check(&self, addr: &NetAddr) -> bool {
        for rule in &self.rules {
            if rule.prefix.contains(addr) {
                return rule.accept;
            }
        }
        self.default_accept
    }
}
